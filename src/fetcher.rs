use crate::error::FetchError;
use crate::model::{CandleWindow, Interval, Symbol};
use crate::source::MarketDataSource;
use tracing::debug;

/// Pulls fixed size candle windows for one exchange and interval.
pub struct CandleWindowFetcher<'a> {
    source: &'a dyn MarketDataSource,
    interval: Interval,
    window_size: usize,
}

impl<'a> CandleWindowFetcher<'a> {
    /// `window_size` counts the current candle plus its baseline, so it must be at least 2.
    pub fn new(source: &'a dyn MarketDataSource, interval: Interval, window_size: usize) -> Self {
        Self {
            source,
            interval,
            window_size,
        }
    }

    /// Fetches the latest `window_size` candles of `symbol`, oldest first.
    ///
    /// A source that answers with fewer candles (fresh listings) yields
    /// [`FetchError::IncompleteWindow`]; surplus candles are trimmed from the old end.
    pub async fn fetch(&self, symbol: Symbol) -> Result<CandleWindow, FetchError> {
        let mut candles = match self
            .source
            .get_candles(&symbol, self.interval, self.window_size)
            .await
        {
            Ok(candles) => candles,
            Err(source) => return Err(FetchError::SourceUnavailable { symbol, source }),
        };

        let received = candles.len();
        if received < self.window_size {
            return Err(FetchError::IncompleteWindow {
                symbol,
                expected: self.window_size,
                received,
            });
        }
        if received > self.window_size {
            candles.drain(..received - self.window_size);
        }

        let window =
            CandleWindow::new(symbol.clone(), candles).ok_or(FetchError::IncompleteWindow {
                symbol,
                expected: self.window_size,
                received,
            })?;
        debug!(symbol = %window.symbol(), candles = window.len(), "fetched candle window");
        Ok(window)
    }
}
