use super::{MarketDataSource, candle_from_row, deserialize_f64_lenient, matches_filters};
use crate::error::SourceError;
use crate::model::{Candle, Interval, Symbol};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const BASE_URL: &str = "https://fapi.binance.com";

pub(crate) const KLINE_KEYS: &[&str] = &[
    "openTime",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "closeTime",
    "quoteAssetVolume",
    "numberOfTrades",
    "takerBuyBaseAssetVolume",
    "takerBuyQuoteAssetVolume",
    "ignore",
];

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "quoteVolume", default, deserialize_with = "deserialize_f64_lenient")]
    quote_volume: Option<f64>,
}

/// Binance USD-M futures public market data.
pub struct BinanceSource {
    client: Client,
    base_url: String,
}

impl BinanceSource {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == 418 || status == 429 {
            let body = response.text().await.unwrap_or_default();
            if let Some(wait) = ban_wait(&body, now_millis()) {
                // Every further request would extend the ban, so hold this one back until it lifts.
                warn!(status = status.as_u16(), wait_secs = wait.as_secs_f64(), "Binance IP ban, waiting");
                tokio::time::sleep(wait).await;
            }
            return Err(SourceError::RateLimited {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        Ok(response)
    }
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    fn label(&self) -> &str {
        "Binance"
    }

    fn display_suffix(&self) -> &str {
        "USDT"
    }

    async fn list_active_symbols(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Symbol>, SourceError> {
        let info: ExchangeInfo = self.get("/fapi/v1/exchangeInfo", &[]).await?.json().await?;

        Ok(info
            .symbols
            .iter()
            .filter(|s| matches_filters(s, filters))
            .filter_map(|s| s.get("symbol").and_then(|v| v.as_str()))
            .map(Symbol::from)
            .collect())
    }

    async fn quote_volume_24h(&self) -> Result<HashMap<Symbol, f64>, SourceError> {
        let tickers: Vec<Ticker24h> = self.get("/fapi/v1/ticker/24hr", &[]).await?.json().await?;

        Ok(tickers
            .into_iter()
            .filter_map(|t| t.quote_volume.map(|v| (Symbol::from(t.symbol), v)))
            .collect())
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval_code(interval).to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get("/fapi/v1/klines", &query).await?.json().await?;

        rows.into_iter()
            .map(|row| candle_from_row(KLINE_KEYS, row))
            .collect()
    }
}

fn interval_code(interval: Interval) -> &'static str {
    match interval {
        Interval::OneHour => "1h",
        Interval::FourHours => "4h",
        Interval::OneDay => "1d",
    }
}

/// How long to back off when a `-1003` response reports an IP ban lasting `until <ms>`.
fn ban_wait(body: &str, now_ms: u64) -> Option<Duration> {
    if !body.contains("-1003") {
        return None;
    }
    let re = Regex::new(r"until\s+(\d+)").ok()?;
    let ban_until = re.captures(body)?.get(1)?.as_str().parse::<u64>().ok()?;
    if ban_until <= now_ms {
        return None;
    }
    let wait_sec = ((ban_until - now_ms) as f64 / 1000.0) + 5.0;
    Some(Duration::from_secs_f64(wait_sec))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
