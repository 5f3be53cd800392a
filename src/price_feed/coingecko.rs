use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tracing::debug;

use crate::config::PriceFeedConfig;
use crate::error::FetchError;
use crate::model::{Asset, Currency, PriceQuote};
use crate::price_feed::PriceFeed;

/// `{ "bitcoin": { "usd": 1.0, "brl": 5.0 }, ... }`
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// CoinGecko `/simple/price` feed for every tracked asset in USD and BRL.
pub struct CoingeckoFeed {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl CoingeckoFeed {
    pub fn new(config: &PriceFeedConfig) -> Result<Self, Report<FetchError>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .change_context(FetchError::Client)?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(nonzero!(30u32));
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        })
    }
}

impl PriceFeed for CoingeckoFeed {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    fn fetch(&self) -> BoxFuture<'_, Result<Vec<PriceQuote>, Report<FetchError>>> {
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let ids = Asset::ALL.map(Asset::coingecko_id).join(",");
            let currencies = Currency::ALL.map(Currency::code).join(",");
            let params = [("ids", ids.as_str()), ("vs_currencies", currencies.as_str())];

            let response = self
                .client
                .get(&self.base_url)
                .header("accept", "application/json")
                .query(&params)
                .send()
                .await
                .change_context(FetchError::Request)
                .attach_with(|| format!("url: {}", self.base_url))?;

            if !response.status().is_success() {
                return Err(Report::new(FetchError::Status)
                    .attach(format!("HTTP status: {}", response.status())));
            }

            let body: SimplePriceResponse = response
                .json()
                .await
                .change_context(FetchError::ResponseParse)?;

            debug!(assets = body.len(), "coingecko response received");
            parse_quotes(&body, Utc::now())
        })
    }
}

/// Convert a `/simple/price` body into one quote per asset.
///
/// Every asset must carry both currencies, otherwise the whole response is
/// rejected.
fn parse_quotes(
    body: &SimplePriceResponse,
    observed_at: DateTime<Utc>,
) -> Result<Vec<PriceQuote>, Report<FetchError>> {
    Asset::ALL
        .iter()
        .map(|&asset| {
            let price = |currency: Currency| -> Result<f64, Report<FetchError>> {
                body.get(asset.coingecko_id())
                    .and_then(|prices| prices.get(currency.code()))
                    .copied()
                    .filter(|p| p.is_finite())
                    .ok_or_else(|| Report::new(FetchError::MissingQuote { asset, currency }))
            };
            Ok(PriceQuote {
                asset,
                price_usd: price(Currency::Usd)?,
                price_brl: price(Currency::Brl)?,
                observed_at,
            })
        })
        .collect()
}
