use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_base_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price".into()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_secs() -> u64 {
    4
}

fn default_max_backoff_secs() -> u64 {
    10
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    300
}

fn default_rule_batch_size() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Total timeout of a single request attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Page size used when reading active rules for one asset.
    #[serde(default = "default_rule_batch_size")]
    pub rule_batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: default_startup_delay_secs(),
            interval_secs: default_interval_secs(),
            rule_batch_size: default_rule_batch_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
///
/// A missing file yields the defaults.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = if path.exists() {
        std::fs::read_to_string(path)
            .change_context(ConfigError::ReadFile)
            .attach_with(|| format!("path: {}", path.display()))?
    } else {
        String::new()
    };

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(&config.general)?;
    validate_price_feed(&config.price_feed)?;
    validate_scheduler(&config.scheduler)?;
    Ok(())
}

fn invalid(field: impl Into<String>) -> Report<ConfigError> {
    Report::new(ConfigError::Validation {
        field: field.into(),
    })
}

fn validate_general(general: &GeneralConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&general.log_format.as_str()) {
        return Err(invalid(format!(
            "general.log_format \"{}\" is not valid",
            general.log_format
        )));
    }
    if general.data_dir.trim().is_empty() {
        return Err(invalid("general.data_dir must not be empty"));
    }
    Ok(())
}

fn validate_price_feed(feed: &PriceFeedConfig) -> Result<(), Report<ConfigError>> {
    if feed.base_url.trim().is_empty() {
        return Err(invalid("price_feed.base_url must not be empty"));
    }
    if feed.timeout_secs == 0 {
        return Err(invalid("price_feed.timeout_secs must be positive"));
    }
    if feed.max_attempts == 0 {
        return Err(invalid("price_feed.max_attempts must be at least 1"));
    }
    if feed.initial_backoff_secs > feed.max_backoff_secs {
        return Err(invalid(format!(
            "price_feed.initial_backoff_secs ({}) exceeds max_backoff_secs ({})",
            feed.initial_backoff_secs, feed.max_backoff_secs
        )));
    }
    if feed.requests_per_minute == 0 {
        return Err(invalid("price_feed.requests_per_minute must be positive"));
    }
    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), Report<ConfigError>> {
    if scheduler.interval_secs == 0 {
        return Err(invalid("scheduler.interval_secs must be positive"));
    }
    if scheduler.rule_batch_size == 0 {
        return Err(invalid("scheduler.rule_batch_size must be positive"));
    }
    Ok(())
}
