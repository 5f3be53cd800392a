use chrono::{DateTime, SecondsFormat, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::StorageError;
use crate::model::{
    Address, Asset, ComparisonOp, NewNotificationEvent, NotificationEvent, NotificationRule,
    PriceQuote, Transaction, User,
};
use crate::storage::{PipelineStore, WalletStore};

type QuoteRow = (String, f64, f64, String);
type RuleRow = (i64, i64, String, String, f64, bool, String);
type EventRow = (i64, i64, String, f64, f64, f64, String);
type UserRow = (i64, String, String, bool);
type CredentialRow = (i64, String, String, bool, String);
type AddressRow = (i64, i64, String, String, f64);
type TransactionRow = (i64, i64, String, f64, String);

const RULE_COLUMNS: &str = "id, user_id, asset, op, threshold, active, created_at";

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::migrate(pool).await
    }

    /// Single-connection in-memory database with migrations applied.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;

        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .unwrap();
        Self::migrate(pool).await.unwrap()
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<StorageError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;
        Ok(Self { pool })
    }

    async fn fetch_rule(
        &self,
        owner_id: i64,
        rule_id: i64,
    ) -> Result<NotificationRule, Report<StorageError>> {
        let row: Option<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM notification_rules WHERE id = ? AND user_id = ?"
        ))
        .bind(rule_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .change_context(StorageError::Query)?;

        row.map(map_rule_row)
            .transpose()?
            .ok_or_else(|| Report::new(StorageError::NotFound { entity: "rule" }))
    }

    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, Report<StorageError>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, name, email, active FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .change_context(StorageError::Query)?;
        Ok(row.map(map_user_row))
    }
}

impl PipelineStore for SqliteStorage {
    fn append_quotes(
        &self,
        quotes: &[PriceQuote],
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let quotes = quotes.to_vec();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            for q in &quotes {
                sqlx::query(
                    "INSERT INTO prices (asset, price_usd, price_brl, observed_at) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(q.asset.as_str())
                .bind(q.price_usd)
                .bind(q.price_brl)
                .bind(format_time(q.observed_at))
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)
                .attach_with(|| format!("asset: {}", q.asset))?;
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn latest_quote(
        &self,
        asset: Asset,
    ) -> BoxFuture<'_, Result<Option<PriceQuote>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<QuoteRow> = sqlx::query_as(
                "SELECT asset, price_usd, price_brl, observed_at \
                 FROM prices \
                 WHERE asset = ? \
                 ORDER BY observed_at DESC, id DESC \
                 LIMIT 1",
            )
            .bind(asset.as_str())
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            row.map(map_quote_row).transpose()
        })
    }

    fn active_rules_page(
        &self,
        asset: Asset,
        after_id: i64,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<NotificationRule>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<RuleRow> = sqlx::query_as(&format!(
                "SELECT {RULE_COLUMNS} FROM notification_rules \
                 WHERE asset = ? AND active = 1 AND id > ? \
                 ORDER BY id ASC \
                 LIMIT ?"
            ))
            .bind(asset.as_str())
            .bind(after_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_rule_row).collect()
        })
    }

    fn record_events(
        &self,
        events: &[NewNotificationEvent],
    ) -> BoxFuture<'_, Result<Vec<NewNotificationEvent>, Report<StorageError>>> {
        let events = events.to_vec();
        Box::pin(async move {
            if events.is_empty() {
                return Ok(Vec::new());
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            let mut recorded = Vec::with_capacity(events.len());
            for e in events {
                // Rules deleted or deactivated since evaluation select no row.
                let inserted = sqlx::query(
                    "INSERT INTO notification_events \
                     (rule_id, asset, price_usd, price_brl, threshold, triggered_at) \
                     SELECT id, asset, ?, ?, ?, ? FROM notification_rules \
                     WHERE id = ? AND active = 1",
                )
                .bind(e.price_usd)
                .bind(e.price_brl)
                .bind(e.threshold)
                .bind(format_time(e.triggered_at))
                .bind(e.rule_id)
                .execute(&mut *tx)
                .await
                .change_context(StorageError::Insert)
                .attach_with(|| format!("rule_id: {}", e.rule_id))?
                .rows_affected();

                if inserted == 0 {
                    debug!(rule_id = e.rule_id, "rule gone or inactive, event dropped");
                } else {
                    recorded.push(e);
                }
            }

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(recorded)
        })
    }
}

impl WalletStore for SqliteStorage {
    fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>> {
        let name = name.to_string();
        let email = email.to_string();
        let password_hash = password_hash.to_string();
        Box::pin(async move {
            let id = sqlx::query(
                "INSERT INTO users (name, email, password_hash, active) VALUES (?, ?, ?, 1)",
            )
            .bind(&name)
            .bind(&email)
            .bind(&password_hash)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("email: {email}"))?
            .last_insert_rowid();

            Ok(User {
                id,
                name,
                email,
                active: true,
            })
        })
    }

    fn get_user(&self, user_id: i64) -> BoxFuture<'_, Result<Option<User>, Report<StorageError>>> {
        Box::pin(self.fetch_user(user_id))
    }

    fn find_user_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<User>, Report<StorageError>>> {
        let email = email.to_string();
        Box::pin(async move {
            let row: Option<UserRow> =
                sqlx::query_as("SELECT id, name, email, active FROM users WHERE email = ?")
                    .bind(&email)
                    .fetch_optional(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
            Ok(row.map(map_user_row))
        })
    }

    fn find_credentials(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<(User, String)>, Report<StorageError>>> {
        let email = email.to_string();
        Box::pin(async move {
            let row: Option<CredentialRow> = sqlx::query_as(
                "SELECT id, name, email, active, password_hash FROM users WHERE email = ?",
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(|(id, name, email, active, password_hash)| {
                (map_user_row((id, name, email, active)), password_hash)
            }))
        })
    }

    fn set_user_active(
        &self,
        user_id: i64,
        active: bool,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>> {
        Box::pin(async move {
            let updated = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
                .bind(active)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Update)?
                .rows_affected();

            if updated == 0 {
                return Err(Report::new(StorageError::NotFound { entity: "user" }));
            }

            self.fetch_user(user_id)
                .await?
                .ok_or_else(|| Report::new(StorageError::NotFound { entity: "user" }))
        })
    }

    fn update_user(
        &self,
        user_id: i64,
        name: &str,
        email: &str,
    ) -> BoxFuture<'_, Result<User, Report<StorageError>>> {
        let name = name.to_string();
        let email = email.to_string();
        Box::pin(async move {
            let updated = sqlx::query("UPDATE users SET name = ?, email = ? WHERE id = ?")
                .bind(&name)
                .bind(&email)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Update)?
                .rows_affected();

            if updated == 0 {
                return Err(Report::new(StorageError::NotFound { entity: "user" }));
            }

            self.fetch_user(user_id)
                .await?
                .ok_or_else(|| Report::new(StorageError::NotFound { entity: "user" }))
        })
    }

    fn create_address(
        &self,
        owner_id: i64,
        asset: Asset,
        address: &str,
    ) -> BoxFuture<'_, Result<Address, Report<StorageError>>> {
        let address = address.to_string();
        Box::pin(async move {
            let id = sqlx::query(
                "INSERT INTO addresses (user_id, address, asset, balance) VALUES (?, ?, ?, 0.0)",
            )
            .bind(owner_id)
            .bind(&address)
            .bind(asset.as_str())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("user_id: {owner_id}"))?
            .last_insert_rowid();

            Ok(Address {
                id,
                owner_id,
                address,
                asset,
                balance: 0.0,
            })
        })
    }

    fn list_addresses(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<Address>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<AddressRow> = sqlx::query_as(
                "SELECT id, user_id, address, asset, balance FROM addresses \
                 WHERE user_id = ? ORDER BY id ASC",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_address_row).collect()
        })
    }

    fn get_address(
        &self,
        owner_id: i64,
        address_id: i64,
    ) -> BoxFuture<'_, Result<Option<Address>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<AddressRow> = sqlx::query_as(
                "SELECT id, user_id, address, asset, balance FROM addresses \
                 WHERE id = ? AND user_id = ?",
            )
            .bind(address_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            row.map(map_address_row).transpose()
        })
    }

    fn add_transaction(
        &self,
        owner_id: i64,
        address_id: i64,
        tx_hash: &str,
        amount: f64,
    ) -> BoxFuture<'_, Result<Transaction, Report<StorageError>>> {
        let tx_hash = tx_hash.to_string();
        Box::pin(async move {
            let timestamp = Utc::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            let updated = sqlx::query(
                "UPDATE addresses SET balance = balance + ? WHERE id = ? AND user_id = ?",
            )
            .bind(amount)
            .bind(address_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .change_context(StorageError::Update)?
            .rows_affected();

            if updated == 0 {
                return Err(Report::new(StorageError::NotFound { entity: "address" }));
            }

            let id = sqlx::query(
                "INSERT INTO transactions (address_id, tx_hash, amount, timestamp) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(address_id)
            .bind(&tx_hash)
            .bind(amount)
            .bind(format_time(timestamp))
            .execute(&mut *tx)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("tx_hash: {tx_hash}"))?
            .last_insert_rowid();

            tx.commit().await.change_context(StorageError::Insert)?;

            Ok(Transaction {
                id,
                address_id,
                tx_hash,
                amount,
                timestamp,
            })
        })
    }

    fn list_transactions(
        &self,
        owner_id: i64,
        address_id: i64,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<TransactionRow> = sqlx::query_as(
                "SELECT t.id, t.address_id, t.tx_hash, t.amount, t.timestamp \
                 FROM transactions t \
                 JOIN addresses a ON a.id = t.address_id \
                 WHERE t.address_id = ? AND a.user_id = ? \
                 ORDER BY t.timestamp ASC, t.id ASC",
            )
            .bind(address_id)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_transaction_row).collect()
        })
    }

    fn create_rule(
        &self,
        owner_id: i64,
        asset: Asset,
        op: ComparisonOp,
        threshold: f64,
    ) -> BoxFuture<'_, Result<NotificationRule, Report<StorageError>>> {
        Box::pin(async move {
            let created_at = Utc::now();
            let id = sqlx::query(
                "INSERT INTO notification_rules \
                 (user_id, asset, op, threshold, active, created_at) \
                 VALUES (?, ?, ?, ?, 1, ?)",
            )
            .bind(owner_id)
            .bind(asset.as_str())
            .bind(op.as_str())
            .bind(threshold)
            .bind(format_time(created_at))
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("user_id: {owner_id}"))?
            .last_insert_rowid();

            Ok(NotificationRule {
                id,
                owner_id,
                asset,
                op,
                threshold,
                active: true,
                created_at,
            })
        })
    }

    fn list_rules(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<NotificationRule>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<RuleRow> = sqlx::query_as(&format!(
                "SELECT {RULE_COLUMNS} FROM notification_rules WHERE user_id = ? ORDER BY id ASC"
            ))
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_rule_row).collect()
        })
    }

    fn toggle_rule(
        &self,
        owner_id: i64,
        rule_id: i64,
    ) -> BoxFuture<'_, Result<NotificationRule, Report<StorageError>>> {
        Box::pin(async move {
            let updated = sqlx::query(
                "UPDATE notification_rules SET active = NOT active WHERE id = ? AND user_id = ?",
            )
            .bind(rule_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Update)?
            .rows_affected();

            if updated == 0 {
                return Err(Report::new(StorageError::NotFound { entity: "rule" }));
            }

            self.fetch_rule(owner_id, rule_id).await
        })
    }

    fn delete_rule(
        &self,
        owner_id: i64,
        rule_id: i64,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            let deleted = sqlx::query("DELETE FROM notification_rules WHERE id = ? AND user_id = ?")
                .bind(rule_id)
                .bind(owner_id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Update)?
                .rows_affected();

            if deleted == 0 {
                return Err(Report::new(StorageError::NotFound { entity: "rule" }));
            }
            Ok(())
        })
    }

    fn list_events(
        &self,
        owner_id: i64,
    ) -> BoxFuture<'_, Result<Vec<NotificationEvent>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<EventRow> = sqlx::query_as(
                "SELECT e.id, e.rule_id, e.asset, e.price_usd, e.price_brl, e.threshold, \
                 e.triggered_at \
                 FROM notification_events e \
                 JOIN notification_rules r ON r.id = e.rule_id \
                 WHERE r.user_id = ? \
                 ORDER BY e.triggered_at DESC, e.id DESC",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_event_row).collect()
        })
    }
}

/// Fixed-width UTC timestamps keep lexical and chronological order equal.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, Report<StorageError>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .change_context(StorageError::Query)
        .attach_with(|| format!("invalid timestamp: {value}"))
}

fn parse_asset(value: &str) -> Result<Asset, Report<StorageError>> {
    value
        .parse()
        .map_err(|e: String| Report::new(StorageError::Query).attach(e))
}

fn parse_op(value: &str) -> Result<ComparisonOp, Report<StorageError>> {
    value
        .parse()
        .map_err(|e: String| Report::new(StorageError::Query).attach(e))
}

fn map_quote_row(
    (asset, price_usd, price_brl, observed_at): QuoteRow,
) -> Result<PriceQuote, Report<StorageError>> {
    Ok(PriceQuote {
        asset: parse_asset(&asset)?,
        price_usd,
        price_brl,
        observed_at: parse_time(&observed_at)?,
    })
}

fn map_event_row(
    (id, rule_id, asset, price_usd, price_brl, threshold, triggered_at): EventRow,
) -> Result<NotificationEvent, Report<StorageError>> {
    Ok(NotificationEvent {
        id,
        rule_id,
        asset: parse_asset(&asset)?,
        price_usd,
        price_brl,
        threshold,
        triggered_at: parse_time(&triggered_at)?,
    })
}

fn map_transaction_row(
    (id, address_id, tx_hash, amount, timestamp): TransactionRow,
) -> Result<Transaction, Report<StorageError>> {
    Ok(Transaction {
        id,
        address_id,
        tx_hash,
        amount,
        timestamp: parse_time(&timestamp)?,
    })
}

fn map_rule_row(
    (id, owner_id, asset, op, threshold, active, created_at): RuleRow,
) -> Result<NotificationRule, Report<StorageError>> {
    Ok(NotificationRule {
        id,
        owner_id,
        asset: parse_asset(&asset)?,
        op: parse_op(&op)?,
        threshold,
        active,
        created_at: parse_time(&created_at)?,
    })
}

fn map_user_row((id, name, email, active): UserRow) -> User {
    User {
        id,
        name,
        email,
        active,
    }
}

fn map_address_row(
    (id, owner_id, address, asset, balance): AddressRow,
) -> Result<Address, Report<StorageError>> {
    Ok(Address {
        id,
        owner_id,
        address,
        asset: parse_asset(&asset)?,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn quote(asset: Asset, usd: f64, observed_at: DateTime<Utc>) -> PriceQuote {
        PriceQuote {
            asset,
            price_usd: usd,
            price_brl: usd * 5.0,
            observed_at,
        }
    }

    async fn storage_with_user() -> (SqliteStorage, User) {
        let storage = SqliteStorage::in_memory().await;
        let user = storage
            .create_user("Alice", "alice@example.com", "hash")
            .await
            .unwrap();
        (storage, user)
    }

    fn event(rule: &NotificationRule, usd: f64) -> NewNotificationEvent {
        NewNotificationEvent {
            rule_id: rule.id,
            asset: rule.asset,
            price_usd: usd,
            price_brl: usd * 5.0,
            threshold: rule.threshold,
            triggered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn latest_quote_is_absent_before_any_append() {
        let storage = SqliteStorage::in_memory().await;
        assert!(storage.latest_quote(Asset::Btc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_then_latest_round_trips() {
        let storage = SqliteStorage::in_memory().await;
        let now = Utc::now();
        let btc = quote(Asset::Btc, 50_001.0, now);
        let eth = quote(Asset::Eth, 3_000.0, now);
        storage.append_quotes(&[btc.clone(), eth.clone()]).await.unwrap();

        assert_eq!(storage.latest_quote(Asset::Btc).await.unwrap(), Some(btc));
        assert_eq!(storage.latest_quote(Asset::Eth).await.unwrap(), Some(eth));
    }

    #[tokio::test]
    async fn latest_quote_picks_max_observed_at_regardless_of_insert_order() {
        let storage = SqliteStorage::in_memory().await;
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let newest = quote(Asset::Btc, 3.0, base + Duration::minutes(10));
        storage
            .append_quotes(&[quote(Asset::Btc, 1.0, base)])
            .await
            .unwrap();
        storage.append_quotes(&[newest.clone()]).await.unwrap();
        storage
            .append_quotes(&[quote(Asset::Btc, 2.0, base + Duration::minutes(5))])
            .await
            .unwrap();

        assert_eq!(storage.latest_quote(Asset::Btc).await.unwrap(), Some(newest));
        assert!(storage.latest_quote(Asset::Eth).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_rules_page_filters_and_paginates() {
        let (storage, user) = storage_with_user().await;
        let mut btc_ids = Vec::new();
        for threshold in [1.0, 2.0, 3.0] {
            let rule = storage
                .create_rule(user.id, Asset::Btc, ComparisonOp::Greater, threshold)
                .await
                .unwrap();
            btc_ids.push(rule.id);
        }
        storage
            .create_rule(user.id, Asset::Eth, ComparisonOp::Greater, 1.0)
            .await
            .unwrap();
        storage.toggle_rule(user.id, btc_ids[1]).await.unwrap();

        let first = storage.active_rules_page(Asset::Btc, 0, 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, btc_ids[0]);

        let rest = storage
            .active_rules_page(Asset::Btc, first[0].id, 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, btc_ids[2]);
    }

    #[tokio::test]
    async fn record_events_is_all_or_nothing() {
        let (storage, user) = storage_with_user().await;
        let rule = storage
            .create_rule(user.id, Asset::Btc, ComparisonOp::Greater, 50_000.0)
            .await
            .unwrap();

        // SQLite binds NaN as NULL, which the NOT NULL price column rejects.
        let broken = event(&rule, f64::NAN);
        let batch = vec![event(&rule, 50_001.0), event(&rule, 50_001.0), broken];

        assert!(storage.record_events(&batch).await.is_err());
        assert!(storage.list_events(user.id).await.unwrap().is_empty());

        storage
            .record_events(&[event(&rule, 50_001.0)])
            .await
            .unwrap();
        assert_eq!(storage.list_events(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_events_with_empty_batch_is_noop() {
        let (storage, user) = storage_with_user().await;
        storage.record_events(&[]).await.unwrap();
        assert!(storage.list_events(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_are_scoped_to_rule_owner() {
        let (storage, alice) = storage_with_user().await;
        let bob = storage.create_user("Bob", "bob@example.com", "hash").await.unwrap();
        let alice_rule = storage
            .create_rule(alice.id, Asset::Btc, ComparisonOp::Less, 10.0)
            .await
            .unwrap();
        storage
            .record_events(&[event(&alice_rule, 5.0)])
            .await
            .unwrap();

        assert_eq!(storage.list_events(alice.id).await.unwrap().len(), 1);
        assert!(storage.list_events(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rule_crud_is_scoped_to_owner() {
        let (storage, alice) = storage_with_user().await;
        let bob = storage.create_user("Bob", "bob@example.com", "hash").await.unwrap();
        let rule = storage
            .create_rule(alice.id, Asset::Eth, ComparisonOp::Equal, 3_000.0)
            .await
            .unwrap();
        assert!(rule.active);

        assert!(storage.toggle_rule(bob.id, rule.id).await.is_err());
        assert!(storage.delete_rule(bob.id, rule.id).await.is_err());

        let toggled = storage.toggle_rule(alice.id, rule.id).await.unwrap();
        assert!(!toggled.active);
        assert_eq!(toggled.op, ComparisonOp::Equal);
        let toggled = storage.toggle_rule(alice.id, rule.id).await.unwrap();
        assert!(toggled.active);

        assert_eq!(storage.list_rules(alice.id).await.unwrap().len(), 1);
        assert!(storage.list_rules(bob.id).await.unwrap().is_empty());

        storage.delete_rule(alice.id, rule.id).await.unwrap();
        assert!(storage.list_rules(alice.id).await.unwrap().is_empty());
        let err = storage.delete_rule(alice.id, rule.id).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StorageError::NotFound { entity: "rule" }
        ));
    }

    #[tokio::test]
    async fn deleting_rule_removes_its_events() {
        let (storage, user) = storage_with_user().await;
        let rule = storage
            .create_rule(user.id, Asset::Btc, ComparisonOp::GreaterEqual, 1.0)
            .await
            .unwrap();
        storage.record_events(&[event(&rule, 2.0)]).await.unwrap();

        storage.delete_rule(user.id, rule.id).await.unwrap();
        assert!(storage.list_events(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_are_unique_by_email_and_updatable() {
        let (storage, user) = storage_with_user().await;
        assert!(
            storage
                .create_user("Other", "alice@example.com", "hash")
                .await
                .is_err()
        );

        let found = storage
            .find_user_by_email("alice@example.com")
            .await
            .unwrap();
        assert_eq!(found, Some(user.clone()));

        let updated = storage
            .update_user(user.id, "Alice B", "alice.b@example.com")
            .await
            .unwrap();
        assert_eq!(updated.name, "Alice B");
        assert!(
            storage
                .find_user_by_email("alice@example.com")
                .await
                .unwrap()
                .is_none()
        );
        assert!(storage.update_user(9_999, "x", "x@example.com").await.is_err());
    }

    #[tokio::test]
    async fn transactions_update_cached_balance() {
        let (storage, user) = storage_with_user().await;
        let address = storage
            .create_address(user.id, Asset::Btc, "bc1qexampleaddress0000000000")
            .await
            .unwrap();

        storage
            .add_transaction(user.id, address.id, "tx-1", 1.5)
            .await
            .unwrap();
        storage
            .add_transaction(user.id, address.id, "tx-2", -0.25)
            .await
            .unwrap();

        let reloaded = storage
            .get_address(user.id, address.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.balance, 1.25);

        let txs = storage
            .list_transactions(user.id, address.id)
            .await
            .unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].tx_hash, "tx-1");
    }

    #[tokio::test]
    async fn duplicate_tx_hash_leaves_balance_untouched() {
        let (storage, user) = storage_with_user().await;
        let address = storage
            .create_address(user.id, Asset::Eth, "0xexample")
            .await
            .unwrap();
        storage
            .add_transaction(user.id, address.id, "tx-1", 2.0)
            .await
            .unwrap();
        assert!(
            storage
                .add_transaction(user.id, address.id, "tx-1", 5.0)
                .await
                .is_err()
        );

        let reloaded = storage
            .get_address(user.id, address.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.balance, 2.0);
    }

    #[tokio::test]
    async fn addresses_are_scoped_to_owner() {
        let (storage, alice) = storage_with_user().await;
        let bob = storage.create_user("Bob", "bob@example.com", "hash").await.unwrap();
        let address = storage
            .create_address(alice.id, Asset::Eth, "0xabc")
            .await
            .unwrap();

        assert!(storage.get_address(bob.id, address.id).await.unwrap().is_none());
        assert!(storage.list_addresses(bob.id).await.unwrap().is_empty());
        assert_eq!(storage.list_addresses(alice.id).await.unwrap().len(), 1);

        let err = storage
            .add_transaction(bob.id, address.id, "tx-x", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            StorageError::NotFound { entity: "address" }
        ));
    }

    #[tokio::test]
    async fn credentials_and_active_flag_round_trip() {
        let (storage, user) = storage_with_user().await;

        let (found, hash) = storage
            .find_credentials("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, user);
        assert_eq!(hash, "hash");
        assert!(storage.find_credentials("nobody@example.com").await.unwrap().is_none());

        let deactivated = storage.set_user_active(user.id, false).await.unwrap();
        assert!(!deactivated.active);
        assert!(!storage.get_user(user.id).await.unwrap().unwrap().active);

        let err = storage.set_user_active(9_999, true).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            StorageError::NotFound { entity: "user" }
        ));
    }

    #[tokio::test]
    async fn record_events_skips_deleted_and_inactive_rules() {
        let (storage, alice) = storage_with_user().await;
        let bob = storage.create_user("Bob", "bob@example.com", "hash").await.unwrap();
        let deleted = storage
            .create_rule(alice.id, Asset::Btc, ComparisonOp::Greater, 1.0)
            .await
            .unwrap();
        let kept = storage
            .create_rule(bob.id, Asset::Btc, ComparisonOp::Greater, 1.0)
            .await
            .unwrap();
        let inactive = storage
            .create_rule(bob.id, Asset::Btc, ComparisonOp::Greater, 2.0)
            .await
            .unwrap();
        storage.delete_rule(alice.id, deleted.id).await.unwrap();
        storage.toggle_rule(bob.id, inactive.id).await.unwrap();

        let recorded = storage
            .record_events(&[
                event(&deleted, 5.0),
                event(&kept, 5.0),
                event(&inactive, 5.0),
            ])
            .await
            .unwrap();

        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].rule_id, kept.id);
        let events = storage.list_events(bob.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, kept.id);
        assert_eq!(events[0].asset, Asset::Btc);
    }
}
