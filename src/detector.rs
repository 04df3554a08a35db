//! Volume spike detection over a single candle window.

use crate::indicators::{pct_change, rolling_mean};
use crate::model::{CandleWindow, VolumeAnomalyResult};

/// Compares the newest candle of a window with the average of everything before it.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    multiplier: f64,
}

impl AnomalyDetector {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    /// Pure function of `window`: replaying a window always yields the same result.
    ///
    /// * `avg_volume` is the mean of the baseline only, the current candle never counts.
    /// * `volume_ratio` is `current / avg` as is: `+inf` for a spike over a silent baseline,
    ///   NaN when nothing traded at all.
    /// * `is_first_trigger` is set when the current ratio reaches the multiplier and no
    ///   baseline candle already reached `avg_volume * multiplier`, separating a fresh spike
    ///   from a regime that has been elevated for a while.
    pub fn detect(&self, window: &CandleWindow) -> VolumeAnomalyResult {
        let baseline = window.baseline();
        let current = window.current();

        let volumes: Vec<f64> = baseline.iter().map(|c| c.volume).collect();
        // CandleWindow always has at least one baseline candle
        let avg_volume = rolling_mean(&volumes).unwrap_or(0.0);

        // x/0 is +inf and 0/0 is NaN; NaN never compares >= the multiplier
        let volume_ratio = current.volume / avg_volume;

        let spike_level = avg_volume * self.multiplier;
        let is_first_trigger =
            volume_ratio >= self.multiplier && !volumes.iter().any(|&v| v >= spike_level);

        VolumeAnomalyResult {
            symbol: window.symbol().clone(),
            current_volume: current.volume,
            avg_volume,
            volume_ratio,
            price_change_pct: pct_change(current.open, current.close),
            close_price: current.close,
            is_first_trigger,
        }
    }
}
