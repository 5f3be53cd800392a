pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{
    Address, Asset, ComparisonOp, NewNotificationEvent, NotificationEvent, NotificationRule,
    PriceQuote, Transaction, User,
};

/// Persistence needed by the background price pipeline.
pub trait PipelineStore: Send + Sync {
    /// Append one row per quote; all rows are written or none are.
    fn append_quotes(&self, quotes: &[PriceQuote])
    -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Quote with the greatest `observed_at` for `asset`.
    fn latest_quote(
        &self,
        asset: Asset,
    ) -> BoxFuture<'_, Result<Option<PriceQuote>, Report<StorageError>>>;

    /// Active rules for `asset` with `id > after_id`, ordered by id.
    fn active_rules_page(
        &self,
        asset: Asset,
        after_id: i64,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<NotificationRule>, Report<StorageError>>>;

    /// Persist a cycle's events in a single transaction and return the ones
    /// written.
    ///
    /// An event is only written if its rule still exists and is active when
    /// the transaction runs; others are dropped without failing the batch.
    fn record_events(
        &self,
        events: &[NewNotificationEvent],
    ) -> BoxFuture<'_, Result<Vec<NewNotificationEvent>, Report<StorageError>>>;
}

/// Request-path CRUD over users, addresses, transactions and rules.
///
/// Lookups taking an `owner_id` only return rows owned by that user.
pub trait WalletStore: Send + Sync {
    /// Insert an active user. `password_hash` is stored as given.
    fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>>;

    fn get_user(&self, user_id: i64) -> BoxFuture<'_, Result<Option<User>, Report<StorageError>>>;

    fn find_user_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<User>, Report<StorageError>>>;

    /// User and stored password hash for `email`.
    fn find_credentials(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<(User, String)>, Report<StorageError>>>;

    fn set_user_active(
        &self,
        user_id: i64,
        active: bool,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>>;

    fn update_user(
        &self,
        user_id: i64,
        name: &str,
        email: &str,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>>;

    fn create_address(
        &self,
        owner_id: i64,
        asset: Asset,
        address: &str,
    ) -> BoxFuture<'_, Result<Address, Report<StorageError>>>;

    fn list_addresses(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<Address>, Report<StorageError>>>;

    fn get_address(
        &self,
        owner_id: i64,
        address_id: i64,
    ) -> BoxFuture<'_, Result<Option<Address>, Report<StorageError>>>;

    /// Insert a transaction and add its amount to the address's cached balance.
    fn add_transaction(
        &self,
        owner_id: i64,
        address_id: i64,
        tx_hash: &str,
        amount: f64,
    ) -> BoxFuture<'_, Result<Transaction, Report<StorageError>>>;

    fn list_transactions(
        &self,
        owner_id: i64,
        address_id: i64,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, Report<StorageError>>>;

    fn create_rule(
        &self,
        owner_id: i64,
        asset: Asset,
        op: ComparisonOp,
        threshold: f64,
    ) -> BoxFuture<'_, Result<NotificationRule, Report<StorageError>>>;

    fn list_rules(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<NotificationRule>, Report<StorageError>>>;

    /// Flip the active flag and return the updated rule.
    fn toggle_rule(
        &self,
        owner_id: i64,
        rule_id: i64,
    ) -> BoxFuture<'_, Result<NotificationRule, Report<StorageError>>>;

    fn delete_rule(
        &self,
        owner_id: i64,
        rule_id: i64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Events of rules owned by `owner_id`, newest first.
    fn list_events(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<NotificationEvent>, Report<StorageError>>>;
}
