use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{LedgerRequest, LedgerService, Posting};
use crate::config::{DEFAULT_DATABASE, LedgerConfig};
use crate::domain::{AccountId, TransactionKind, format_cents, parse_cents};
use crate::storage::HistoryPage;
use crate::telemetry;

/// Ledgerline - account ledger with atomic credits and debits
#[derive(Parser)]
#[command(name = "ledgerline")]
#[command(about = "Per-account balances with an append-only transaction log")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "LEDGERLINE_DB", default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, env = "LEDGERLINE_MAX_CONNECTIONS", default_value_t = 8)]
    pub max_connections: u32,

    /// How long to wait on a locked database, in milliseconds
    #[arg(long, env = "LEDGERLINE_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Deadline for a single credit or debit, in milliseconds
    #[arg(long, env = "LEDGERLINE_OP_TIMEOUT_MS", default_value_t = 10_000)]
    pub op_timeout_ms: u64,

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

    /// Open a new account with a zero balance
    Open {
        /// Account identifier (must be unique)
        id: String,

        /// Name of the account holder
        #[arg(long)]
        holder: String,
    },

    /// Credit an account
    Deposit {
        /// Account identifier
        id: String,

        /// Amount to deposit (e.g., "50.00" or "50")
        amount: String,

        /// Deduplication key; retrying with the same key never applies twice
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Debit an account
    Withdraw {
        /// Account identifier
        id: String,

        /// Amount to withdraw (e.g., "50.00" or "50")
        amount: String,

        /// Deduplication key; retrying with the same key never applies twice
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Show the balance of an account
    Balance {
        /// Account identifier
        id: String,
    },

    /// List an account's transactions, oldest first
    History {
        /// Account identifier
        id: String,

        /// Only show records after this sequence number
        #[arg(long)]
        after: Option<i64>,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List all accounts
    Accounts,

    /// Verify ledger integrity
    Check,

    /// Export an account's history to CSV or JSON
    Export {
        /// Account identifier
        id: String,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Storage and engine settings taken from flags and environment.
    pub fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_operation_timeout(Duration::from_millis(self.op_timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        telemetry::init(if self.verbose { "debug" } else { "info" });
        let config = self.config();

        let service = match self.command {
            Commands::Init => LedgerService::init(&config).await?,
            _ => LedgerService::connect(&config).await?,
        };

        let result = run_command(&service, &config, self.command).await;
        service.close().await;
        result
    }
}

async fn run_command(
    service: &LedgerService,
    config: &LedgerConfig,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Database initialized: {}", config.database_path.display());
        }

        Commands::Open { id, holder } => {
            let account = service
                .accounts()
                .open_account(parse_account_id(&id)?, holder)
                .await?;
            println!(
                "Opened account: {} ({}, {})",
                account.id, account.holder_name, account.account_type
            );
        }

        Commands::Deposit { id, amount, key } => {
            let posting = post(service, TransactionKind::Credit, &id, &amount, key).await?;
            print_posting("Deposited", &posting);
        }

        Commands::Withdraw { id, amount, key } => {
            let posting = post(service, TransactionKind::Debit, &id, &amount, key).await?;
            print_posting("Withdrew", &posting);
        }

        Commands::Balance { id } => {
            let account_id = parse_account_id(&id)?;
            let balance = service.queries().get_balance(&account_id).await?;
            println!("{}: {}", account_id, format_cents(balance));
        }

        Commands::History { id, after, limit } => {
            let mut page = HistoryPage::all();
            if let Some(sequence) = after {
                page = page.after(sequence);
            }
            if let Some(limit) = limit {
                page = page.limit(limit);
            }
            run_history_command(service, &parse_account_id(&id)?, page).await?;
        }

        Commands::Accounts => run_accounts_command(service).await?,

        Commands::Check => run_check_command(service).await?,

        Commands::Export { id, format, output } => {
            run_export_command(service, &parse_account_id(&id)?, &format, output).await?;
        }
    }

    Ok(())
}

fn parse_account_id(raw: &str) -> Result<AccountId> {
    AccountId::parse(raw).with_context(|| format!("Invalid account id '{}'", raw))
}

async fn post(
    service: &LedgerService,
    kind: TransactionKind,
    id: &str,
    amount: &str,
    key: Option<String>,
) -> Result<Posting> {
    let amount_cents = parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")?;

    let mut request = LedgerRequest::new(parse_account_id(id)?, amount_cents);
    if let Some(key) = key {
        request = request.with_dedup_key(key);
    }

    let posting = match kind {
        TransactionKind::Credit => service.engine().credit(request).await?,
        TransactionKind::Debit => service.engine().debit(request).await?,
    };
    Ok(posting)
}

fn print_posting(verb: &str, posting: &Posting) {
    let record = &posting.record;
    println!(
        "{} {} ({}). New balance: {}",
        verb,
        format_cents(record.amount_cents),
        record.account_id,
        format_cents(posting.new_balance)
    );
    if posting.replayed {
        println!("  (already applied as #{}, nothing changed)", record.sequence);
    }
}

async fn run_history_command(
    service: &LedgerService,
    account_id: &AccountId,
    page: HistoryPage,
) -> Result<()> {
    let records = service.history(account_id, page).await?;

    if records.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:>6} {:<20} {:<7} {:>12} {:>12} KEY",
        "SEQ", "RECORDED", "KIND", "AMOUNT", "BALANCE"
    );
    println!("{}", "-".repeat(72));
    for record in &records {
        println!(
            "{:>6} {:<20} {:<7} {:>12} {:>12} {}",
            record.sequence,
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.kind,
            format_cents(record.amount_cents),
            format_cents(record.resulting_balance),
            truncate(record.dedup_key.as_deref().unwrap_or(""), 20)
        );
    }
    Ok(())
}

async fn run_accounts_command(service: &LedgerService) -> Result<()> {
    let accounts = service.accounts().list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts found.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<8} {:>12}", "ID", "HOLDER", "TYPE", "BALANCE");
    println!("{}", "-".repeat(67));
    for account in accounts {
        println!(
            "{:<20} {:<24} {:<8} {:>12}",
            truncate(account.id.as_str(), 20),
            truncate(&account.holder_name, 24),
            account.account_type,
            format_cents(account.balance)
        );
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.accounts().check_integrity().await?;

    println!("Accounts:      {}", report.account_count);
    println!("Transactions:  {}", report.transaction_count);
    println!("Total balance: {}", format_cents(report.total_balance));
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

async fn run_export_command(
    service: &LedgerService,
    account_id: &AccountId,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    use crate::io::{ExportFormat, Exporter};
    use std::fs::File;
    use std::io::{Write, stdout};

    let format = ExportFormat::from_str(format)
        .with_context(|| format!("Invalid export format '{}'. Valid formats: csv, json", format))?;

    let writer: Box<dyn Write> = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = Exporter::new(service)
        .export_history(account_id, format, writer)
        .await?;
    if output.is_some() {
        eprintln!("Exported {} transactions of {}", count, account_id);
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-rather-long-key", 10), "a-rathe...");
        assert_eq!(truncate("žžžžžž", 5), "žž...");
    }

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from([
            "ledgerline",
            "--database",
            "test.db",
            "--max-connections",
            "2",
            "--op-timeout-ms",
            "250",
            "balance",
            "ACC-1",
        ])
        .unwrap();

        let config = cli.config();
        assert_eq!(config.database_path, PathBuf::from("test.db"));
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert!(matches!(cli.command, Commands::Balance { .. }));
    }

    #[test]
    fn test_deposit_with_key() {
        let cli =
            Cli::try_parse_from(["ledgerline", "deposit", "ACC-1", "12.50", "--key", "req-1"])
                .unwrap();
        match cli.command {
            Commands::Deposit { id, amount, key } => {
                assert_eq!(id, "ACC-1");
                assert_eq!(amount, "12.50");
                assert_eq!(key.as_deref(), Some("req-1"));
            }
            _ => panic!("expected deposit"),
        }
    }
}
