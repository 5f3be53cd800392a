pub mod terminal;

use crate::model::{NewNotificationEvent, NotificationRule};

/// Sink for triggered notifications, called after the events are persisted.
pub trait Notifier: Send + Sync {
    fn notify(&self, rule: &NotificationRule, event: &NewNotificationEvent);
}
