//! Best-effort delivery of long reports over a length-limited message transport.

pub mod telegram;

use crate::error::{DeliveryFailure, TransportError};
use crate::storage_utils::DeliveryConfig;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

pub use telegram::TelegramTransport;

/// Sends one text message to a destination bound at construction.
///
/// Implementations enforce their own per-message ceiling; callers keep below it.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug)]
pub struct SegmentStatus {
    pub index: usize,
    pub attempts: u32,
    pub result: Result<(), DeliveryFailure>,
}

/// Per-segment outcome of one delivery. Partial success is a normal outcome.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub segments: Vec<SegmentStatus>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.segments.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.segments.len() - self.delivered()
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }
}

pub struct ChunkedDelivery<'a> {
    transport: &'a dyn MessageTransport,
    max_segment_length: usize,
    max_retries: u32,
    retry_delay: Duration,
    segment_delay: Duration,
}

impl<'a> ChunkedDelivery<'a> {
    pub fn new(transport: &'a dyn MessageTransport, config: &DeliveryConfig) -> Self {
        Self {
            transport,
            max_segment_length: config.max_segment_length,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            segment_delay: config.segment_delay(),
        }
    }

    /// Splits `text` and sends every segment, retrying each up to `max_retries` attempts.
    ///
    /// A segment that runs out of attempts is recorded as failed and the remaining segments
    /// are still sent.
    pub async fn deliver(&self, text: &str) -> DeliveryReport {
        let segments = split_segments(text, self.max_segment_length);
        let mut report = DeliveryReport {
            segments: Vec::with_capacity(segments.len()),
        };

        for (index, segment) in segments.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.segment_delay).await;
            }
            let status = self.send_segment(index, segment).await;
            if let Err(failure) = &status.result {
                error!(%failure, "segment delivery failed");
            }
            report.segments.push(status);
        }

        info!(
            segments = report.segments.len(),
            delivered = report.delivered(),
            failed = report.failed(),
            "delivery finished"
        );
        report
    }

    async fn send_segment(&self, index: usize, segment: &str) -> SegmentStatus {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            match self.transport.send(segment).await {
                Ok(()) => {
                    return SegmentStatus {
                        index,
                        attempts: attempt,
                        result: Ok(()),
                    };
                }
                Err(e) => {
                    warn!(segment = index, attempt, error = %e, "send attempt failed");
                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        SegmentStatus {
            index,
            attempts: self.max_retries,
            result: Err(DeliveryFailure {
                index,
                attempts: self.max_retries,
                last_error,
            }),
        }
    }
}

/// Splits `text` into segments of at most `max_len` characters.
///
/// Transports that count differently (Telegram counts UTF-16 units, so each emoji marker costs
/// two) need `max_len` below their ceiling; the default 4000 leaves 96 units for markers.
///
/// Each cut prefers the last newline within the first `max_len + 1` characters; that newline
/// is consumed by the split. When the newline sits in the first half of the window (or there
/// is none) the segment is cut hard at `max_len` characters instead.
pub fn split_segments(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut segments = Vec::new();
    let mut rest = text;

    loop {
        // Byte offset of the char at index `max_len`, i.e. the end of a full segment
        let Some((hard_end, _)) = rest.char_indices().nth(max_len) else {
            break;
        };

        // A newline right at `hard_end` still yields a segment of exactly `max_len` chars
        let window_end = hard_end + rest[hard_end..].chars().next().map_or(0, char::len_utf8);
        let newline = rest[..window_end]
            .rfind('\n')
            .filter(|&pos| rest[..pos].chars().count() >= max_len / 2);

        match newline {
            Some(pos) => {
                segments.push(rest[..pos].to_string());
                rest = &rest[pos + 1..];
            }
            None => {
                segments.push(rest[..hard_end].to_string());
                rest = &rest[hard_end..];
            }
        }
    }

    if !rest.is_empty() || segments.is_empty() {
        segments.push(rest.to_string());
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubTransport;
    use tokio::time::Instant;

    fn config(max_segment_length: usize) -> DeliveryConfig {
        DeliveryConfig {
            max_segment_length,
            max_retries: 3,
            retry_delay_ms: 1000,
            segment_delay_ms: 200,
        }
    }

    #[test]
    fn test_short_text_is_one_segment() {
        assert_eq!(split_segments("hello", 3000), vec!["hello".to_string()]);
        assert_eq!(split_segments("", 3000), vec![String::new()]);
        assert_eq!(split_segments("abc", 3), vec!["abc".to_string()]);
    }

    #[test]
    fn test_forced_split_preserves_text() {
        let text = "x".repeat(7000);
        let segments = split_segments(&text, 3000);

        let lens: Vec<usize> = segments.iter().map(|s| s.chars().count()).collect();
        assert_eq!(lens, vec![3000, 3000, 1000]);
        assert_eq!(segments.concat(), text);
    }

    #[test]
    fn test_newline_split_collapses_boundary() {
        // 70 lines of 99 chars + newline = 7000 chars
        let text = (0..70)
            .map(|i| format!("{:0>99}", i))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n";
        assert_eq!(text.chars().count(), 7000);

        let segments = split_segments(&text, 3000);
        assert!(segments.iter().all(|s| s.chars().count() <= 3000));
        assert!(segments.iter().all(|s| !s.starts_with('\n')));
        assert_eq!(segments.join("\n"), text);
        // no line is ever cut
        for segment in &segments {
            assert!(segment.lines().all(|l| l.len() == 99));
        }
    }

    #[test]
    fn test_early_newline_forces_hard_split() {
        let text = format!("head\n{}", "y".repeat(7000));
        let segments = split_segments(&text, 3000);

        assert_eq!(segments[0].chars().count(), 3000);
        assert!(segments[0].starts_with("head\n"));
        assert_eq!(segments.concat(), text);
        assert!(segments.iter().all(|s| s.chars().count() <= 3000));
    }

    #[test]
    fn test_newline_exactly_at_limit() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(5));
        let segments = split_segments(&text, 10);

        assert_eq!(segments, vec!["a".repeat(10), "b".repeat(5)]);
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let text = "🔥".repeat(25);
        let segments = split_segments(&text, 10);

        let lens: Vec<usize> = segments.iter().map(|s| s.chars().count()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
        assert_eq!(segments.concat(), text);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let transport = StubTransport::with_plan(&[false, false, true]);
        let delivery = ChunkedDelivery::new(&transport, &config(3000));
        let started = Instant::now();

        let report = delivery.deliver("volume alert").await;

        assert!(report.is_complete());
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].attempts, 3);
        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.sent(), vec!["volume alert".to_string()]);
        // two backoff waits of 1s each
        let elapsed = started.elapsed().as_millis();
        assert!((2000..2010).contains(&elapsed), "elapsed {elapsed}ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_segment_does_not_abort_the_rest() {
        // segment 0 fails all 3 attempts, segment 1 and 2 succeed first time
        let transport = StubTransport::with_plan(&[false, false, false, true, true]);
        let delivery = ChunkedDelivery::new(&transport, &config(10));
        let started = Instant::now();

        let report = delivery.deliver(&"z".repeat(25)).await;

        assert_eq!(report.segments.len(), 3);
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_complete());

        let failure = report.segments[0].result.as_ref().unwrap_err();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.attempts, 3);
        assert!(failure.last_error.contains("Too Many Requests"));

        assert_eq!(transport.sent(), vec!["z".repeat(10), "z".repeat(5)]);
        // 2 backoffs on segment 0 plus 2 inter-segment spacings
        let elapsed = started.elapsed().as_millis();
        assert!((2400..2410).contains(&elapsed), "elapsed {elapsed}ms");
    }
}
