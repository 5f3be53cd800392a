use crate::model::{NewNotificationEvent, NotificationRule};
use crate::notifier::Notifier;

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, rule: &NotificationRule, event: &NewNotificationEvent) {
        tracing::warn!(
            rule_id = rule.id,
            owner_id = rule.owner_id,
            asset = %event.asset,
            price_usd = event.price_usd,
            price_brl = event.price_brl,
            threshold = event.threshold,
            "NOTIFICATION: {} price {} {} {}",
            event.asset,
            event.price_usd,
            rule.op,
            event.threshold,
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{Asset, ComparisonOp};

    #[test]
    fn terminal_notifier_does_not_panic() {
        let notifier = TerminalNotifier;
        let rule = NotificationRule {
            id: 1,
            owner_id: 2,
            asset: Asset::Eth,
            op: ComparisonOp::LessEqual,
            threshold: 2_000.0,
            active: true,
            created_at: Utc::now(),
        };
        let event = NewNotificationEvent {
            rule_id: 1,
            asset: Asset::Eth,
            price_usd: 1_999.5,
            price_brl: 9_997.5,
            threshold: 2_000.0,
            triggered_at: Utc::now(),
        };
        // Should not panic
        notifier.notify(&rule, &event);
    }
}
