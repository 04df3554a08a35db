use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange specific instrument identifier, e.g. `BTCUSDT` or `BTC-USDT-SWAP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Presentation form with the exchange quote suffix removed. Never use the result as a key.
    pub fn display_name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            return self.0.clone();
        }
        self.0.strip_suffix(suffix).unwrap_or(&self.0).to_string()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candle intervals every market data source must understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

/// Exactly `window_size` candles for one symbol, oldest first. The last candle is the
/// "current" interval, everything before it is the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleWindow {
    symbol: Symbol,
    candles: Vec<Candle>,
}

impl CandleWindow {
    /// Returns `None` unless `candles` holds at least one baseline candle plus the current one.
    pub fn new(symbol: Symbol, candles: Vec<Candle>) -> Option<Self> {
        if candles.len() < 2 {
            return None;
        }
        Some(Self { symbol, candles })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn baseline(&self) -> &[Candle] {
        &self.candles[..self.candles.len() - 1]
    }

    pub fn current(&self) -> &Candle {
        &self.candles[self.candles.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeAnomalyResult {
    pub symbol: Symbol,
    pub current_volume: f64,
    pub avg_volume: f64,
    #[serde(serialize_with = "serialize_ratio")]
    pub volume_ratio: f64,
    pub price_change_pct: f64,
    pub close_price: f64,
    pub is_first_trigger: bool,
}

/// JSON has no infinity; a spike over a silent baseline is written as `"inf"`.
fn serialize_ratio<S>(ratio: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if ratio.is_finite() {
        serializer.serialize_f64(*ratio)
    } else if ratio.is_nan() {
        serializer.serialize_str("NaN")
    } else if *ratio > 0.0 {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}
