use chrono::Utc;
use error_stack::{Report, ResultExt};

use crate::error::PipelineError;
use crate::model::{NewNotificationEvent, NotificationRule, PriceQuote};
use crate::storage::PipelineStore;

/// Snapshot each satisfied rule against `quote`.
///
/// The threshold is copied so later edits to the rule do not change the event.
pub fn build_events(rules: &[&NotificationRule], quote: &PriceQuote) -> Vec<NewNotificationEvent> {
    let triggered_at = Utc::now();
    rules
        .iter()
        .map(|rule| NewNotificationEvent {
            rule_id: rule.id,
            asset: rule.asset,
            price_usd: quote.price_usd,
            price_brl: quote.price_brl,
            threshold: rule.threshold,
            triggered_at,
        })
        .collect()
}

/// Persist one event per satisfied rule as a single batch and return the
/// events actually written.
///
/// Nothing is written when no rule is satisfied. Rules deleted or deactivated
/// after they were loaded get no event.
pub async fn record(
    store: &dyn PipelineStore,
    rules: &[&NotificationRule],
    quote: &PriceQuote,
) -> Result<Vec<NewNotificationEvent>, Report<PipelineError>> {
    if rules.is_empty() {
        return Ok(Vec::new());
    }

    let events = build_events(rules, quote);
    store
        .record_events(&events)
        .await
        .change_context(PipelineError::Evaluation { asset: quote.asset })
        .attach_with(|| format!("batch of {} events", events.len()))
}
