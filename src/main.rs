mod auth;
mod config;
mod error;
mod model;
mod notification;
mod notifier;
mod price_feed;
mod scheduler;
mod storage;
mod wallet;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use model::{Asset, ComparisonOp};
use notifier::Notifier;
use notifier::terminal::TerminalNotifier;
use price_feed::PriceFeed;
use price_feed::coingecko::CoingeckoFeed;
use scheduler::{Scheduler, SchedulerSettings};
use storage::sqlite::SqliteStorage;
use storage::{PipelineStore, WalletStore};

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("authentication error")]
    Auth,
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("price feed error")]
    PriceFeed,
    #[display("wallet error")]
    Wallet,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(
    name = "wallet-tracker",
    about = "Crypto wallet tracker with price threshold notifications"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background price scheduler until ctrl+c
    Run,
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage wallet addresses
    #[command(subcommand)]
    Address(AddressCommand),
    /// Record and list address transactions
    #[command(subcommand)]
    Tx(TxCommand),
    /// Manage price notification rules
    #[command(subcommand)]
    Rule(RuleCommand),
    /// List triggered notifications for a user, newest first
    Events {
        #[arg(long)]
        user: i64,
    },
    /// Show the latest stored quote for every asset
    Prices,
}

#[derive(Subcommand)]
enum UserCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Verify credentials of an active user
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Show {
        #[arg(long)]
        email: String,
    },
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Re-enable a deactivated user
    Activate {
        #[arg(long)]
        id: i64,
    },
    /// Block a user from logging in and from owner-scoped commands
    Deactivate {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum AddressCommand {
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        asset: Asset,
        #[arg(long)]
        address: String,
    },
    List {
        #[arg(long)]
        user: i64,
    },
    /// Value an address with the latest stored quote
    Balance {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum TxCommand {
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        address: i64,
        #[arg(long)]
        hash: String,
        #[arg(long, allow_negative_numbers = true)]
        amount: f64,
    },
    List {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        address: i64,
    },
}

#[derive(Subcommand)]
enum RuleCommand {
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        asset: Asset,
        /// One of >=, <=, >, <, ==
        #[arg(long)]
        op: ComparisonOp,
        #[arg(long)]
        threshold: f64,
    },
    List {
        #[arg(long)]
        user: i64,
    },
    Toggle {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },
    Delete {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },
}

impl Command {
    /// User a command acts on behalf of; it must exist and be active.
    fn owner(&self) -> Option<i64> {
        match self {
            Command::Run | Command::Prices | Command::User(_) => None,
            Command::Events { user } => Some(*user),
            Command::Address(
                AddressCommand::Add { user, .. }
                | AddressCommand::List { user }
                | AddressCommand::Balance { user, .. },
            ) => Some(*user),
            Command::Tx(TxCommand::Add { user, .. } | TxCommand::List { user, .. }) => Some(*user),
            Command::Rule(
                RuleCommand::Add { user, .. }
                | RuleCommand::List { user }
                | RuleCommand::Toggle { user, .. }
                | RuleCommand::Delete { user, .. },
            ) => Some(*user),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Storage ───────────────────────────────────────────────────────────────
    let data_dir = &config.general.data_dir;
    std::fs::create_dir_all(data_dir)
        .change_context(AppError::Storage)
        .attach_with(|| format!("data_dir: {data_dir}"))?;

    let db_path = format!("{data_dir}/wallet-tracker.db");
    let storage = Arc::new(
        SqliteStorage::open(Path::new(&db_path))
            .await
            .change_context(AppError::Storage)?,
    );

    if let Some(owner) = cli.command.owner() {
        auth::authorize(storage.as_ref(), owner)
            .await
            .change_context(AppError::Auth)?;
    }

    match cli.command {
        Command::Run => run_scheduler(&config, storage).await,
        Command::User(cmd) => user_command(storage.as_ref(), cmd).await,
        Command::Address(cmd) => address_command(storage.as_ref(), cmd).await,
        Command::Tx(cmd) => tx_command(storage.as_ref(), cmd).await,
        Command::Rule(cmd) => rule_command(storage.as_ref(), cmd).await,
        Command::Events { user } => {
            let events = storage
                .list_events(user)
                .await
                .change_context(AppError::Storage)?;
            print_json(&events)
        }
        Command::Prices => {
            let mut quotes = Vec::new();
            for asset in Asset::ALL {
                let latest = storage
                    .latest_quote(asset)
                    .await
                    .change_context(AppError::Storage)?;
                quotes.extend(latest);
            }
            print_json(&quotes)
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Report<AppError>> {
    let json = serde_json::to_string_pretty(value).change_context(AppError::Runtime)?;
    println!("{json}");
    Ok(())
}

async fn run_scheduler(
    config: &AppConfig,
    storage: Arc<SqliteStorage>,
) -> Result<(), Report<AppError>> {
    let feed: Arc<dyn PriceFeed> =
        Arc::new(CoingeckoFeed::new(&config.price_feed).change_context(AppError::PriceFeed)?);
    let notifier: Arc<dyn Notifier> = Arc::new(TerminalNotifier);
    let store: Arc<dyn PipelineStore> = storage;

    let scheduler = Arc::new(Scheduler::new(
        feed,
        store,
        notifier,
        SchedulerSettings::from_config(config),
    ));

    let cancel = CancellationToken::new();
    let handle = scheduler.spawn(cancel.clone());

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    cancel.cancel();

    // A cycle in flight is bounded by the fetch retries; give it time to finish.
    let grace = Duration::from_secs(
        config.price_feed.timeout_secs * u64::from(config.price_feed.max_attempts)
            + config.price_feed.max_backoff_secs * u64::from(config.price_feed.max_attempts)
            + 5,
    );
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(cycles)) => info!(cycles, "shutdown complete"),
        Ok(Err(e)) => tracing::error!(error = %e, "scheduler task failed"),
        Err(_) => tracing::warn!("scheduler did not stop within grace period"),
    }
    Ok(())
}

async fn user_command(storage: &SqliteStorage, cmd: UserCommand) -> Result<(), Report<AppError>> {
    match cmd {
        UserCommand::Add {
            name,
            email,
            password,
        } => {
            let user = auth::register(storage, &name, &email, &password)
                .await
                .change_context(AppError::Auth)?;
            print_json(&user)
        }
        UserCommand::Login { email, password } => {
            let user = auth::login(storage, &email, &password)
                .await
                .change_context(AppError::Auth)?;
            print_json(&user)
        }
        UserCommand::Show { email } => {
            let user = storage
                .find_user_by_email(&email)
                .await
                .change_context(AppError::Storage)?;
            print_json(&user)
        }
        UserCommand::Update { id, name, email } => {
            let user = storage
                .update_user(id, &name, &email)
                .await
                .change_context(AppError::Storage)?;
            print_json(&user)
        }
        UserCommand::Activate { id } => set_user_active(storage, id, true).await,
        UserCommand::Deactivate { id } => set_user_active(storage, id, false).await,
    }
}

async fn set_user_active(
    storage: &SqliteStorage,
    user_id: i64,
    active: bool,
) -> Result<(), Report<AppError>> {
    let user = storage
        .set_user_active(user_id, active)
        .await
        .change_context(AppError::Storage)?;
    info!(user_id, active, "user status changed");
    print_json(&user)
}

async fn address_command(
    storage: &SqliteStorage,
    cmd: AddressCommand,
) -> Result<(), Report<AppError>> {
    match cmd {
        AddressCommand::Add {
            user,
            asset,
            address,
        } => {
            let address = storage
                .create_address(user, asset, &address)
                .await
                .change_context(AppError::Storage)?;
            print_json(&address)
        }
        AddressCommand::List { user } => {
            let addresses = storage
                .list_addresses(user)
                .await
                .change_context(AppError::Storage)?;
            print_json(&addresses)
        }
        AddressCommand::Balance { user, id } => {
            let balance = wallet::balance(storage, user, id)
                .await
                .change_context(AppError::Wallet)?;
            print_json(&balance)
        }
    }
}

async fn tx_command(storage: &SqliteStorage, cmd: TxCommand) -> Result<(), Report<AppError>> {
    match cmd {
        TxCommand::Add {
            user,
            address,
            hash,
            amount,
        } => {
            let tx = storage
                .add_transaction(user, address, &hash, amount)
                .await
                .change_context(AppError::Storage)?;
            print_json(&tx)
        }
        TxCommand::List { user, address } => {
            let txs = storage
                .list_transactions(user, address)
                .await
                .change_context(AppError::Storage)?;
            print_json(&txs)
        }
    }
}

async fn rule_command(storage: &SqliteStorage, cmd: RuleCommand) -> Result<(), Report<AppError>> {
    match cmd {
        RuleCommand::Add {
            user,
            asset,
            op,
            threshold,
        } => {
            let rule = storage
                .create_rule(user, asset, op, threshold)
                .await
                .change_context(AppError::Storage)?;
            print_json(&rule)
        }
        RuleCommand::List { user } => {
            let rules = storage
                .list_rules(user)
                .await
                .change_context(AppError::Storage)?;
            print_json(&rules)
        }
        RuleCommand::Toggle { user, id } => {
            let rule = storage
                .toggle_rule(user, id)
                .await
                .change_context(AppError::Storage)?;
            info!(rule_id = rule.id, active = rule.active, "rule toggled");
            print_json(&rule)
        }
        RuleCommand::Delete { user, id } => {
            storage
                .delete_rule(user, id)
                .await
                .change_context(AppError::Storage)?;
            info!(rule_id = id, "rule deleted");
            Ok(())
        }
    }
}
