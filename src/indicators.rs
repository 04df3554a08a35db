use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// Mean of `values` as a single full-period SMA step. `None` for an empty slice.
pub fn rolling_mean(values: &[f64]) -> Option<f64> {
    let mut sma = SimpleMovingAverage::new(values.len()).ok()?;

    let mut last = None;
    for &value in values {
        last = Some(sma.next(value));
    }
    last
}

/// Percentage move from `open` to `close`; a zero open has no defined move and reports 0.
pub fn pct_change(open: f64, close: f64) -> f64 {
    if open == 0.0 {
        return 0.0;
    }
    (close - open) / open * 100.0
}
