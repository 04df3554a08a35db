use crate::model::Symbol;
use thiserror::Error;

/// Errors raised by a market data adapter while talking to an exchange.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("rate limited (HTTP {status})")]
    RateLimited { status: u16 },

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("request signing failed: {0}")]
    Signing(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}

/// Reasons a candle window could not be produced for one symbol.
///
/// Both variants are recovered by the caller: the symbol is logged and left out of the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{symbol}: incomplete window, expected {expected} candles but received {received}")]
    IncompleteWindow {
        symbol: Symbol,
        expected: usize,
        received: usize,
    },

    #[error("{symbol}: source unavailable: {source}")]
    SourceUnavailable {
        symbol: Symbol,
        #[source]
        source: SourceError,
    },
}

impl FetchError {
    pub fn symbol(&self) -> &Symbol {
        match self {
            FetchError::IncompleteWindow { symbol, .. } => symbol,
            FetchError::SourceUnavailable { symbol, .. } => symbol,
        }
    }
}

/// Failure of a message transport to accept one message.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport rejected message: {0}")]
    Rejected(String),
}

/// A delivery segment that exhausted its retry budget.
#[derive(Debug, Error)]
#[error("segment {index} failed after {attempts} attempt(s): {last_error}")]
pub struct DeliveryFailure {
    pub index: usize,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_symbol() {
        let incomplete = FetchError::IncompleteWindow {
            symbol: Symbol::from("NEWUSDT"),
            expected: 21,
            received: 3,
        };
        assert_eq!(incomplete.symbol().as_str(), "NEWUSDT");
        assert_eq!(
            incomplete.to_string(),
            "NEWUSDT: incomplete window, expected 21 candles but received 3"
        );

        let unavailable = FetchError::SourceUnavailable {
            symbol: Symbol::from("BTCUSDT"),
            source: SourceError::Status(502),
        };
        assert_eq!(unavailable.symbol().as_str(), "BTCUSDT");
        assert!(unavailable.to_string().contains("502"));
    }
}
