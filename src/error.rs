use derive_more::{Display, Error};

use crate::model::{Asset, Currency};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("failed to build price feed client")]
    Client,
    #[display("price feed request failed")]
    Request,
    #[display("price feed returned a non-success status")]
    Status,
    #[display("failed to parse price feed response")]
    ResponseParse,
    #[display("price feed response is missing {currency} quote for {asset}")]
    MissingQuote { asset: Asset, currency: Currency },
    #[display("price fetch failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to update data")]
    Update,
    #[display("failed to query data")]
    Query,
    #[display("{entity} not found")]
    NotFound { entity: &'static str },
}

/// Failure kinds of one scheduler cycle.
///
/// `Fetch` and `Persistence` end the cycle early; `Evaluation` is isolated to
/// the asset it names.
#[derive(Debug, Display, Error)]
pub enum PipelineError {
    #[display("price fetch failed")]
    Fetch,
    #[display("failed to persist price quotes")]
    Persistence,
    #[display("notification evaluation failed for {asset}")]
    Evaluation { asset: Asset },
}

#[derive(Debug, Display, Error)]
pub enum WalletError {
    #[display("wallet storage error")]
    Storage,
    #[display("address not found")]
    AddressNotFound,
    #[display("no price data available for {asset}")]
    PriceUnavailable { asset: Asset },
}

#[derive(Debug, Display, Error)]
pub enum AuthError {
    #[display("user storage error")]
    Storage,
    #[display("failed to hash password")]
    Hash,
    #[display("invalid email or password")]
    InvalidCredentials,
    #[display("user {user_id} not found")]
    UnknownUser { user_id: i64 },
    #[display("user is inactive")]
    Inactive,
}
