use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::application::LedgerService;
use crate::config::LedgerConfig;
use crate::domain::{EntryDetails, Transaction, Wallet, format_cents, parse_amount};

/// Kassa - e-wallet ledger
#[derive(Parser)]
#[command(name = "kassa")]
#[command(about = "Wallet balances with an append-only transaction log")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "KASSA_DATABASE", default_value = "kassa.db")]
    pub database: String,

    /// Currency for newly created wallets
    #[arg(long, env = "KASSA_CURRENCY", default_value = "USD")]
    pub currency: String,

    /// Maximum time a balance change may take before it is rolled back
    #[arg(long, env = "KASSA_TX_TIMEOUT_MS", default_value_t = 10_000)]
    pub tx_timeout_ms: u64,

    /// Maximum time to wait for another writer to release the database
    #[arg(long, env = "KASSA_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Fail deposits to users without a wallet instead of creating one
    #[arg(long, env = "KASSA_NO_AUTO_PROVISION")]
    pub no_auto_provision: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Credit a user's wallet
    Deposit {
        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,

        /// Authenticated user id
        #[arg(short, long)]
        user: i64,

        #[command(flatten)]
        details: DetailArgs,
    },

    /// Debit a user's wallet
    Withdraw {
        /// Amount to withdraw (e.g., "50.00" or "50")
        amount: String,

        /// Authenticated user id
        #[arg(short, long)]
        user: i64,

        #[command(flatten)]
        details: DetailArgs,
    },

    /// Move money between two wallets
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source wallet id
        #[arg(long)]
        from: i64,

        /// Destination wallet id
        #[arg(long)]
        to: i64,

        #[command(flatten)]
        details: DetailArgs,
    },

    /// Show the balance of a user's wallet
    Balance {
        /// Authenticated user id
        #[arg(short, long)]
        user: i64,
    },

    /// List a wallet's transactions, newest first
    History {
        /// Wallet id
        #[arg(short, long)]
        wallet: i64,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a wallet for a user
    Create {
        /// Authenticated user id
        #[arg(short, long)]
        user: i64,

        /// Opening balance (e.g., "100.00")
        #[arg(long)]
        initial: Option<String>,
    },

    /// Show wallet details
    Show {
        /// Wallet id
        id: i64,
    },
}

#[derive(clap::Args)]
pub struct DetailArgs {
    /// Free-text note stored with the entry
    #[arg(short, long)]
    note: Option<String>,

    /// Informational fee (e.g., "0.50"); it does not change any balance
    #[arg(long)]
    fee: Option<String>,
}

impl DetailArgs {
    fn into_details(self) -> Result<EntryDetails> {
        let fee = self
            .fee
            .map(|f| parse_amount(&f))
            .transpose()
            .context("Invalid fee format. Use '0.50' or '1'")?
            .unwrap_or(0);

        let mut details = EntryDetails::default().with_fee(fee);
        if let Some(note) = self.note {
            details = details.with_note(note);
        }
        Ok(details)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "kassa=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            default_currency: self.currency.clone(),
            tx_timeout: Duration::from_millis(self.tx_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            auto_provision_on_deposit: !self.no_auto_provision,
            ..LedgerConfig::for_path(&self.database)
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init => {
                LedgerService::init(config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Wallet(wallet_cmd) => {
                let service = LedgerService::connect(config).await?;
                run_wallet_command(&service, wallet_cmd).await?;
            }

            Commands::Deposit {
                amount,
                user,
                details,
            } => {
                let service = LedgerService::connect(config).await?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let wallet = service
                    .deposit_with(user, amount, details.into_details()?)
                    .await?;
                println!(
                    "Deposited {} into wallet {}: balance {}",
                    format_cents(amount),
                    wallet.id,
                    format_balance(&wallet)
                );
            }

            Commands::Withdraw {
                amount,
                user,
                details,
            } => {
                let service = LedgerService::connect(config).await?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let wallet = service
                    .withdraw_with(user, amount, details.into_details()?)
                    .await?;
                println!(
                    "Withdrew {} from wallet {}: balance {}",
                    format_cents(amount),
                    wallet.id,
                    format_balance(&wallet)
                );
            }

            Commands::Transfer {
                amount,
                from,
                to,
                details,
            } => {
                let service = LedgerService::connect(config).await?;
                let amount =
                    parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let receipt = service
                    .transfer_with(from, to, amount, details.into_details()?)
                    .await?;
                println!(
                    "Transferred {}: wallet {} -> wallet {} (entries {}, {})",
                    format_cents(amount),
                    receipt.sender.id,
                    receipt.receiver.id,
                    receipt.debit.id,
                    receipt.credit.id
                );
                println!("  {:>6}  {}", receipt.sender.id, format_balance(&receipt.sender));
                println!(
                    "  {:>6}  {}",
                    receipt.receiver.id,
                    format_balance(&receipt.receiver)
                );
            }

            Commands::Balance { user } => {
                let service = LedgerService::connect(config).await?;
                let wallet = service.get_balance(user).await?;
                println!("Wallet {}: {}", wallet.id, format_balance(&wallet));
            }

            Commands::History {
                wallet,
                limit,
                json,
            } => {
                let service = LedgerService::connect(config).await?;
                run_history_command(&service, wallet, limit, json).await?;
            }

            Commands::Check => {
                let service = LedgerService::connect(config).await?;
                run_check_command(&service).await?;
            }
        }

        Ok(())
    }
}

fn format_balance(wallet: &Wallet) -> String {
    format!("{} {}", format_cents(wallet.balance), wallet.currency)
}

async fn run_wallet_command(service: &LedgerService, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create { user, initial } => {
            let initial = initial
                .map(|a| parse_amount(&a))
                .transpose()
                .context("Invalid opening balance. Use '100.00' or '100'")?
                .unwrap_or(0);
            let wallet = service
                .open_wallet(user, initial, EntryDetails::default())
                .await?;
            println!(
                "Created wallet {} for user {} ({})",
                wallet.id,
                wallet.user_id,
                format_balance(&wallet)
            );
        }

        WalletCommands::Show { id } => {
            let wallet = service.get_wallet(id).await?;
            println!("Wallet: {}", wallet.id);
            println!("  User:     {}", wallet.user_id);
            println!("  Balance:  {}", format_balance(&wallet));
            println!(
                "  Created:  {}",
                wallet.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!(
                "  Updated:  {}",
                wallet.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

async fn run_history_command(
    service: &LedgerService,
    wallet_id: i64,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let entries: Vec<Transaction> = service
        .list_transactions(wallet_id)
        .await?
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<19} {:<16} {:>8} {:>12} {:>8}  NOTE",
        "ID", "DATE", "TYPE", "OTHER", "AMOUNT", "FEE"
    );
    println!("{}", "-".repeat(80));
    for entry in entries {
        println!(
            "{:<6} {:<19} {:<16} {:>8} {:>12} {:>8}  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.kind.as_str(),
            entry
                .to_wallet
                .map(|w| w.to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_cents(entry.amount),
            format_cents(entry.fee),
            entry.note.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Wallets:      {}", report.wallet_count);
    println!("Transactions: {}", report.transaction_count);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}
