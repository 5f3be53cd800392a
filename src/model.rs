use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tracked cryptocurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::Btc, Asset::Eth];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Eth => "ETH",
        }
    }

    /// CoinGecko coin id used in `/simple/price` requests and responses.
    pub fn coingecko_id(self) -> &'static str {
        match self {
            Self::Btc => "bitcoin",
            Self::Eth => "ethereum",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Self::Btc),
            "ETH" => Ok(Self::Eth),
            _ => Err(format!("unknown asset \"{s}\" (expected BTC or ETH)")),
        }
    }
}

/// Reference currency a quote is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Usd,
    Brl,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Usd, Currency::Brl];

    /// Lowercase code as used by CoinGecko's `vs_currencies`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Brl => "brl",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An asset's price in both reference currencies at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub asset: Asset,
    pub price_usd: f64,
    pub price_brl: f64,
    pub observed_at: DateTime<Utc>,
}

/// Operator a rule compares the current price against its threshold with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "==")]
    Equal,
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::Equal => "==",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">=" => Ok(Self::GreaterEqual),
            "<=" => Ok(Self::LessEqual),
            ">" => Ok(Self::Greater),
            "<" => Ok(Self::Less),
            "==" => Ok(Self::Equal),
            _ => Err(format!(
                "unknown comparison operator \"{s}\" (expected >=, <=, >, < or ==)"
            )),
        }
    }
}

/// A user-defined price threshold condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRule {
    pub id: i64,
    pub owner_id: i64,
    pub asset: Asset,
    pub op: ComparisonOp,
    pub threshold: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification event before it has been persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotificationEvent {
    pub rule_id: i64,
    pub asset: Asset,
    pub price_usd: f64,
    pub price_brl: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
}

/// Persisted record of a rule being satisfied during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub id: i64,
    pub rule_id: i64,
    pub asset: Asset,
    pub price_usd: f64,
    pub price_brl: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Address {
    pub id: i64,
    pub owner_id: i64,
    pub address: String,
    pub asset: Asset,
    /// Cached sum of all transaction amounts.
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub address_id: i64,
    pub tx_hash: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Address balance valued with the latest known quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub address: String,
    pub asset: Asset,
    pub balance_crypto: f64,
    pub balance_usd: f64,
    pub balance_brl: f64,
    pub priced_at: DateTime<Utc>,
}
