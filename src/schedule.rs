use chrono::{DateTime, Duration, DurationRound, Utc};

/// Next instant strictly after `now` whose minute is `minute` and whose seconds are zero.
pub fn next_run_at(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    let hour_start = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    let candidate = hour_start + Duration::minutes(i64::from(minute % 60));
    if candidate > now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}

/// How long to sleep from `now` until [`next_run_at`].
pub fn wait_until_next_run(now: DateTime<Utc>, minute: u32) -> std::time::Duration {
    (next_run_at(now, minute) - now)
        .to_std()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_next_run_later_this_hour() {
        assert_eq!(next_run_at(at(13, 10, 30), 55), at(13, 55, 0));
    }

    #[test]
    fn test_next_run_rolls_to_next_hour() {
        assert_eq!(next_run_at(at(13, 55, 0), 55), at(14, 55, 0));
        assert_eq!(next_run_at(at(13, 56, 12), 55), at(14, 55, 0));
    }

    #[test]
    fn test_next_run_rolls_over_midnight() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 0, 55, 0).unwrap();
        assert_eq!(next_run_at(at(23, 58, 0), 55), expected);
    }

    #[test]
    fn test_wait_until_next_run() {
        assert_eq!(
            wait_until_next_run(at(13, 54, 30), 55),
            std::time::Duration::from_secs(30)
        );
    }
}
