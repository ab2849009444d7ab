//! In-memory market data source that records what the extractor asked for

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use stock_extract::api::{MarketDataClient, RateLimiter};
use stock_extract::models::{DownloadWindow, FinancialStatement, PriceBar, StatementKind};
use stock_extract::ExtractError;

#[derive(Default)]
pub struct FakeMarketData {
    pub bars: BTreeMap<String, Vec<PriceBar>>,
    pub info: Map<String, Value>,
    pub statements: Vec<(StatementKind, FinancialStatement)>,
    pub windows: Mutex<Vec<DownloadWindow>>,
}

impl FakeMarketData {
    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn recorded_windows(&self) -> Vec<DownloadWindow> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataClient for FakeMarketData {
    async fn history(
        &self,
        symbol: &str,
        _period: &str,
        _interval: &str,
    ) -> Result<Vec<PriceBar>, ExtractError> {
        Ok(self.bars.get(symbol).cloned().unwrap_or_default())
    }

    async fn info(&self, symbol: &str) -> Result<Map<String, Value>, ExtractError> {
        if self.info.is_empty() {
            return Err(ExtractError::Empty(symbol.to_string()));
        }
        Ok(self.info.clone())
    }

    async fn statement(
        &self,
        _symbol: &str,
        kind: StatementKind,
    ) -> Result<FinancialStatement, ExtractError> {
        Ok(self
            .statements
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, statement)| statement.clone())
            .unwrap_or_default())
    }

    async fn download(
        &self,
        symbols: &[String],
        window: &DownloadWindow,
    ) -> Result<BTreeMap<String, Vec<PriceBar>>, ExtractError> {
        self.windows.lock().unwrap().push(window.clone());
        Ok(symbols
            .iter()
            .filter_map(|symbol| self.bars.get(symbol).map(|bars| (symbol.clone(), bars.clone())))
            .collect())
    }
}

/// Rate limiter that only counts how often it was asked to wait
#[derive(Default)]
pub struct CountingLimiter {
    waits: AtomicUsize,
}

impl CountingLimiter {
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn wait(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}
