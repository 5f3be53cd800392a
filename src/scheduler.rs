use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use error_stack::{Report, ResultExt};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::model::{Asset, PriceQuote};
use crate::notification::{self, condition};
use crate::notifier::Notifier;
use crate::price_feed::{self, PriceFeed, RetryPolicy};
use crate::storage::PipelineStore;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub startup_delay: Duration,
    pub interval: Duration,
    pub rule_batch_size: u32,
    pub retry: RetryPolicy,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            startup_delay: config.scheduler.startup_delay(),
            interval: config.scheduler.interval(),
            rule_batch_size: config.scheduler.rule_batch_size,
            retry: RetryPolicy::from_config(&config.price_feed),
        }
    }
}

/// Outcome of a cycle that got past fetching and persisting quotes.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub quotes: Vec<PriceQuote>,
    /// Events recorded per asset.
    pub triggered: BTreeMap<Asset, usize>,
    /// Per-asset evaluation failures; other assets were still evaluated.
    pub failures: Vec<Report<PipelineError>>,
}

/// Periodic fetch, store, evaluate and log pipeline.
///
/// One cycle runs to completion before the idle interval starts, so cycles
/// never overlap.
pub struct Scheduler {
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn PipelineStore>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn PipelineStore>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            feed,
            store,
            notifier,
            settings,
        }
    }

    /// Spawn [`Scheduler::run`] on the tokio runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run cycles until `cancel` fires. Returns the number of cycles run.
    ///
    /// Cancellation is observed during the startup delay and while idle
    /// between cycles, never in the middle of a cycle.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        info!(
            feed = self.feed.name(),
            startup_delay_ms = self.settings.startup_delay.as_millis() as u64,
            interval_ms = self.settings.interval.as_millis() as u64,
            "price scheduler starting"
        );

        let mut cycles = 0;
        if !idle(self.settings.startup_delay, &cancel).await {
            info!(cycles, "price scheduler cancelled before first cycle");
            return cycles;
        }

        loop {
            let cycle_id = Uuid::new_v4();
            let started = Instant::now();
            let outcome = self
                .run_cycle()
                .instrument(info_span!("cycle", %cycle_id))
                .await;
            cycles += 1;

            match outcome {
                Ok(report) => info!(
                    %cycle_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    quotes = report.quotes.len(),
                    triggered = report.triggered.values().sum::<usize>(),
                    failed_assets = report.failures.len(),
                    "cycle complete"
                ),
                Err(e) => error!(%cycle_id, error = ?e, "cycle aborted"),
            }

            if !idle(self.settings.interval, &cancel).await {
                break;
            }
        }

        info!(cycles, "price scheduler stopped");
        cycles
    }

    /// Fetch once for all assets, persist the quotes, then evaluate and log
    /// each asset independently.
    ///
    /// Fetch and persistence failures abort the cycle. Evaluation failures
    /// are collected in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport, Report<PipelineError>> {
        let quotes = price_feed::fetch_with_retry(self.feed.as_ref(), &self.settings.retry)
            .await
            .change_context(PipelineError::Fetch)?;

        for q in &quotes {
            info!(
                asset = %q.asset,
                price_usd = q.price_usd,
                price_brl = q.price_brl,
                "price fetched"
            );
        }

        self.store
            .append_quotes(&quotes)
            .await
            .change_context(PipelineError::Persistence)?;
        info!(count = quotes.len(), "prices stored");

        let mut report = CycleReport::default();
        for quote in &quotes {
            let asset = quote.asset;
            match self.evaluate_asset(quote).await {
                Ok(triggered) => {
                    report.triggered.insert(asset, triggered);
                }
                Err(e) => {
                    error!(%asset, error = ?e, "notification evaluation failed");
                    report.failures.push(e);
                }
            }
        }

        report.quotes = quotes;
        Ok(report)
    }

    async fn evaluate_asset(&self, quote: &PriceQuote) -> Result<usize, Report<PipelineError>> {
        let rules = notification::load_active_rules(
            self.store.as_ref(),
            quote.asset,
            self.settings.rule_batch_size,
        )
        .await?;

        let satisfied = condition::evaluate(&rules, quote.asset, quote.price_usd);
        let events = notification::log::record(self.store.as_ref(), &satisfied, quote).await?;

        for event in &events {
            if let Some(rule) = satisfied.iter().find(|r| r.id == event.rule_id) {
                self.notifier.notify(rule, event);
            }
        }

        info!(
            asset = %quote.asset,
            active_rules = rules.len(),
            triggered = events.len(),
            "notifications evaluated"
        );
        Ok(events.len())
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
async fn idle(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
