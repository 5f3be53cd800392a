pub mod coingecko;

use std::time::Duration;

use error_stack::Report;
use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::warn;

use crate::config::PriceFeedConfig;
use crate::error::FetchError;
use crate::model::PriceQuote;

/// Source of market quotes for every tracked asset.
///
/// A successful fetch returns one quote per `Asset::ALL` entry; partial
/// results are reported as errors.
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Perform a single request attempt.
    fn fetch(&self) -> BoxFuture<'_, Result<Vec<PriceQuote>, Report<FetchError>>>;
}

/// Bounded exponential back-off between fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PriceFeedConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Fetch quotes, retrying any failure until `policy.max_attempts` is reached.
pub async fn fetch_with_retry(
    feed: &dyn PriceFeed,
    policy: &RetryPolicy,
) -> Result<Vec<PriceQuote>, Report<FetchError>> {
    let mut attempt = 1;
    loop {
        match feed.fetch().await {
            Ok(quotes) => return Ok(quotes),
            Err(report) if attempt >= policy.max_attempts => {
                return Err(report.change_context(FetchError::Exhausted { attempts: attempt }));
            }
            Err(report) => {
                let backoff = policy.backoff_after(attempt);
                warn!(
                    feed = feed.name(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = ?report,
                    "price fetch attempt failed, retrying"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
