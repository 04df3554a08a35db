//! Market data sources: the exchange facing side of the scanner.
//!
//! Everything exchange specific (endpoints, field names, signing, symbol suffixes) lives in
//! the adapters below. The rest of the crate only sees [`MarketDataSource`].

pub mod binance;
pub mod okx;

use crate::error::SourceError;
use crate::model::{Candle, Interval, Symbol};
use async_trait::async_trait;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub use binance::BinanceSource;
pub use okx::{OkxCredentials, OkxSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Human readable exchange name used in logs and digests.
    fn label(&self) -> &str;

    /// Quote suffix stripped from symbols when they are displayed.
    fn display_suffix(&self) -> &str;

    /// Currently tradeable perpetual instruments matching every `filters` entry.
    async fn list_active_symbols(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Symbol>, SourceError>;

    /// 24h traded volume in quote currency per symbol.
    async fn quote_volume_24h(&self) -> Result<HashMap<Symbol, f64>, SourceError>;

    /// Up to `limit` most recent candles, oldest first.
    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError>;
}

/// Shared HTTP client for every adapter, optionally routed through a proxy.
pub fn build_http_client(proxy: Option<&str>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(50);
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }
    Ok(builder.build()?)
}

/// True when `instrument` carries every required field value.
///
/// String fields must match exactly, array fields must contain the value, anything else is
/// compared through its JSON text.
pub fn matches_filters(instrument: &Map<String, Value>, filters: &HashMap<String, String>) -> bool {
    filters.iter().all(|(key, required_value)| match instrument.get(key) {
        Some(Value::String(s)) => s == required_value,
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(required_value)),
        Some(v) => &v.to_string() == required_value,
        None => false,
    })
}

// --- Candle rows ---

#[derive(Deserialize, Debug)]
struct RawCandle {
    #[serde(rename = "openTime", alias = "ts", default, deserialize_with = "deserialize_f64_lenient")]
    open_time: Option<f64>,
    #[serde(alias = "o", default, deserialize_with = "deserialize_f64_lenient")]
    open: Option<f64>,
    #[serde(alias = "c", default, deserialize_with = "deserialize_f64_lenient")]
    close: Option<f64>,
    #[serde(alias = "vol", default, deserialize_with = "deserialize_f64_lenient")]
    volume: Option<f64>,
}

/// Converts one positional candle row into a [`Candle`], naming the positions with `keys`.
pub(crate) fn candle_from_row(keys: &[&str], row: Vec<Value>) -> Result<Candle, SourceError> {
    let named: Map<String, Value> = keys
        .iter()
        .zip(row)
        .map(|(&key, val)| (key.to_string(), val))
        .collect();

    let raw: RawCandle = serde_json::from_value(Value::Object(named))?;
    match (raw.open_time, raw.open, raw.close, raw.volume) {
        (Some(open_time), Some(open), Some(close), Some(volume)) => Ok(Candle {
            open_time: open_time as i64,
            open,
            close,
            volume,
        }),
        _ => Err(SourceError::Malformed(format!("incomplete candle row: {raw:?}"))),
    }
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

/// Accepts exchange numbers whether they arrive as JSON numbers or as strings.
pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}
