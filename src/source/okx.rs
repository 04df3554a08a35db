use super::{MarketDataSource, candle_from_row, deserialize_f64_lenient, matches_filters};
use crate::error::{ConfigError, SourceError};
use crate::model::{Candle, Interval, Symbol};
use crate::storage_utils::required_env;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://www.okx.com";

pub(crate) const CANDLE_KEYS: &[&str] = &[
    "ts",
    "o",
    "h",
    "l",
    "c",
    "vol",
    "volCcy",
    "volCcyQuote",
    "confirm",
];

#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl OkxCredentials {
    /// Reads `OKX_API_KEY`, `OKX_SECRET_KEY` and `OKX_PASSPHRASE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required_env("OKX_API_KEY")?,
            secret_key: required_env("OKX_SECRET_KEY")?,
            passphrase: required_env("OKX_PASSPHRASE")?,
        })
    }
}

impl fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Vec<T>,
}

#[derive(Deserialize)]
struct Ticker {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "volCcy24h", default, deserialize_with = "deserialize_f64_lenient")]
    vol_ccy_24h: Option<f64>,
    #[serde(rename = "open24h", default, deserialize_with = "deserialize_f64_lenient")]
    open_24h: Option<f64>,
}

/// OKX perpetual swaps. Every request is signed with the account credentials.
pub struct OkxSource {
    client: Client,
    base_url: String,
    credentials: OkxCredentials,
}

impl OkxSource {
    pub fn new(client: Client, credentials: OkxCredentials) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            credentials,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SourceError> {
        let request_path = with_query(path, query);
        let timestamp = okx_timestamp(Utc::now());
        let signature = sign(
            &self.credentials.secret_key,
            &timestamp,
            "GET",
            &request_path,
            "",
        )?;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, request_path))
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .send()
            .await?;

        let status = response.status();
        if status == 429 {
            return Err(SourceError::RateLimited {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.code != "0" {
            return Err(SourceError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl MarketDataSource for OkxSource {
    fn label(&self) -> &str {
        "OKX"
    }

    fn display_suffix(&self) -> &str {
        "-USDT-SWAP"
    }

    async fn list_active_symbols(
        &self,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Symbol>, SourceError> {
        let instruments: Vec<Map<String, Value>> = self
            .get("/api/v5/public/instruments", &[("instType", "SWAP".to_string())])
            .await?;

        Ok(instruments
            .iter()
            .filter(|i| matches_filters(i, filters))
            .filter_map(|i| i.get("instId").and_then(|v| v.as_str()))
            .filter(|id| id.contains("USDT"))
            .map(Symbol::from)
            .collect())
    }

    async fn quote_volume_24h(&self) -> Result<HashMap<Symbol, f64>, SourceError> {
        let tickers: Vec<Ticker> = self
            .get("/api/v5/market/tickers", &[("instType", "SWAP".to_string())])
            .await?;

        Ok(tickers.into_iter().filter_map(ticker_quote_volume).collect())
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        let query = [
            ("instId", symbol.to_string()),
            ("bar", bar_code(interval).to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.get("/api/v5/market/candles", &query).await?;

        // OKX answers newest first
        let mut candles = rows
            .into_iter()
            .map(|row| candle_from_row(CANDLE_KEYS, row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();
        Ok(candles)
    }
}

/// USDT swaps only; OKX reports base volume, so quote volume is approximated with the 24h open.
fn ticker_quote_volume(ticker: Ticker) -> Option<(Symbol, f64)> {
    if !ticker.inst_id.contains("USDT") {
        return None;
    }
    let volume = ticker.vol_ccy_24h? * ticker.open_24h?;
    Some((Symbol::from(ticker.inst_id), volume))
}

fn bar_code(interval: Interval) -> &'static str {
    match interval {
        Interval::OneHour => "1H",
        Interval::FourHours => "4H",
        Interval::OneDay => "1D",
    }
}

fn with_query(path: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}?{}", path, pairs.join("&"))
}

fn okx_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// `base64(HMAC-SHA256(secret, timestamp + method + request_path + body))`
fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, SourceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SourceError::Signing(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_with_query() {
        assert_eq!(with_query("/api/v5/market/tickers", &[]), "/api/v5/market/tickers");
        assert_eq!(
            with_query(
                "/api/v5/market/candles",
                &[("instId", "BTC-USDT-SWAP".to_string()), ("bar", "1H".to_string())]
            ),
            "/api/v5/market/candles?instId=BTC-USDT-SWAP&bar=1H"
        );
    }

    #[test]
    fn test_okx_timestamp_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 9).unwrap();
        assert_eq!(okx_timestamp(now), "2024-03-01T12:05:09.000Z");
    }

    #[test]
    fn test_sign_is_deterministic_base64_sha256() {
        let a = sign("secret", "2024-03-01T12:05:09.000Z", "GET", "/api/v5/market/tickers", "")
            .unwrap();
        let b = sign("secret", "2024-03-01T12:05:09.000Z", "GET", "/api/v5/market/tickers", "")
            .unwrap();
        let other = sign("secret", "2024-03-01T12:05:09.000Z", "GET", "/api/v5/market/candles", "")
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_ticker_quote_volume() {
        let tickers: Vec<Ticker> = serde_json::from_str(
            r#"[
                {"instId":"BTC-USDT-SWAP","volCcy24h":"1000","open24h":"50000"},
                {"instId":"BTC-USD-SWAP","volCcy24h":"1000","open24h":"50000"},
                {"instId":"ETH-USDT-SWAP","volCcy24h":"","open24h":"3000"}
            ]"#,
        )
        .unwrap();
        let volumes: Vec<_> = tickers.into_iter().filter_map(ticker_quote_volume).collect();

        assert_eq!(volumes, vec![(Symbol::from("BTC-USDT-SWAP"), 50_000_000.0)]);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let credentials = OkxCredentials {
            api_key: "key".to_string(),
            secret_key: "top-secret".to_string(),
            passphrase: "hunter2".to_string(),
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("hunter2"));
    }
}
