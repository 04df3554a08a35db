//! In-memory doubles for the exchange and messaging seams.

use crate::delivery::MessageTransport;
use crate::error::{SourceError, TransportError};
use crate::model::{Candle, Interval, Symbol};
use crate::source::MarketDataSource;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Candles with a constant price and the given volumes, oldest first.
pub fn flat_candles(volumes: &[f64]) -> Vec<Candle> {
    volumes
        .iter()
        .enumerate()
        .map(|(i, &volume)| Candle {
            open_time: i as i64 * 3_600_000,
            open: 100.0,
            close: 100.0,
            volume,
        })
        .collect()
}

/// `baseline` volumes followed by one current candle moving from `open` to `close`.
pub fn window_candles(baseline: &[f64], current_volume: f64, open: f64, close: f64) -> Vec<Candle> {
    let mut candles = flat_candles(baseline);
    candles.push(Candle {
        open_time: baseline.len() as i64 * 3_600_000,
        open,
        close,
        volume: current_volume,
    });
    candles
}

#[derive(Default)]
pub struct StubSource {
    symbols: Vec<Symbol>,
    volumes: HashMap<Symbol, f64>,
    candles: HashMap<Symbol, Option<Vec<Candle>>>,
    universe_fails: bool,
    requested: Mutex<Vec<(Symbol, usize)>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active symbols with their 24h quote volumes.
    pub fn with_universe(mut self, entries: &[(&str, f64)]) -> Self {
        for &(symbol, volume) in entries {
            self.symbols.push(Symbol::from(symbol));
            self.volumes.insert(Symbol::from(symbol), volume);
        }
        self
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(Symbol::from(symbol), Some(candles));
        self
    }

    pub fn with_failure(mut self, symbol: &str) -> Self {
        self.candles.insert(Symbol::from(symbol), None);
        self
    }

    pub fn with_failing_universe(mut self) -> Self {
        self.universe_fails = true;
        self
    }

    pub fn requested(&self) -> Vec<(Symbol, usize)> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataSource for StubSource {
    fn label(&self) -> &str {
        "Stub"
    }

    fn display_suffix(&self) -> &str {
        "USDT"
    }

    async fn list_active_symbols(
        &self,
        _filters: &HashMap<String, String>,
    ) -> Result<Vec<Symbol>, SourceError> {
        if self.universe_fails {
            return Err(SourceError::Status(500));
        }
        Ok(self.symbols.clone())
    }

    async fn quote_volume_24h(&self) -> Result<HashMap<Symbol, f64>, SourceError> {
        Ok(self.volumes.clone())
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        _interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        self.requested.lock().unwrap().push((symbol.clone(), limit));
        match self.candles.get(symbol) {
            Some(Some(candles)) => Ok(candles.clone()),
            Some(None) => Err(SourceError::Status(503)),
            None => Err(SourceError::Status(404)),
        }
    }
}

/// Records delivered messages; fails attempts according to a scripted plan.
#[derive(Default)]
pub struct StubTransport {
    plan: Mutex<VecDeque<bool>>,
    attempts: Mutex<usize>,
    sent: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `plan[i] == false` makes attempt `i` fail. Attempts past the plan succeed.
    pub fn with_plan(plan: &[bool]) -> Self {
        Self {
            plan: Mutex::new(plan.iter().copied().collect()),
            attempts: Mutex::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageTransport for StubTransport {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        let succeed = self.plan.lock().unwrap().pop_front().unwrap_or(true);
        if !succeed {
            return Err(TransportError::Rejected("Too Many Requests".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
