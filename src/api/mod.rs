use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::error::ExtractError;
use crate::models::{DownloadWindow, FinancialStatement, PriceBar, StatementKind};

pub mod alpha_vantage_client;
pub mod yahoo_client;
pub use alpha_vantage_client::AlphaVantageClient;
pub use yahoo_client::YahooClient;

/// Alpha Vantage free tier cooldown applied after each overview request
pub const ALPHA_VANTAGE_COOLDOWN: Duration = Duration::from_secs(15);

/// Pause policy applied between provider requests
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn wait(&self);
}

/// Simple rate limiter for API requests: a fixed pause on every call
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    delay: Duration,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            60_000 / requests_per_minute as u64
        } else {
            1000 // Default 1 second delay
        };

        Self {
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::fixed(ALPHA_VANTAGE_COOLDOWN)
    }
}

#[async_trait]
impl RateLimiter for ApiRateLimiter {
    async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

/// Token-bucket limiter; waits only when the quota is exhausted
pub struct QuotaLimiter {
    limiter: governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl QuotaLimiter {
    pub fn per_minute(requests: NonZeroU32) -> Self {
        Self {
            limiter: governor::RateLimiter::direct(Quota::per_minute(requests)),
        }
    }
}

#[async_trait]
impl RateLimiter for QuotaLimiter {
    async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// No pause at all
#[derive(Debug, Clone, Copy, Default)]
pub struct Unthrottled;

#[async_trait]
impl RateLimiter for Unthrottled {
    async fn wait(&self) {}
}

/// Market data source behind the Yahoo extractor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Auto-adjusted price history over a named period (`1mo`, `1y`, `max`, ...)
    /// at an interval (`1d`, `1wk`, ...)
    async fn history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<PriceBar>, ExtractError>;

    /// Free-form company profile record
    async fn info(&self, symbol: &str) -> Result<Map<String, Value>, ExtractError>;

    async fn statement(
        &self,
        symbol: &str,
        kind: StatementKind,
    ) -> Result<FinancialStatement, ExtractError>;

    /// Auto-adjusted daily bars for several symbols, grouped by symbol.
    /// Symbols the provider has no data for are absent from the map.
    async fn download(
        &self,
        symbols: &[String],
        window: &DownloadWindow,
    ) -> Result<BTreeMap<String, Vec<PriceBar>>, ExtractError>;
}
