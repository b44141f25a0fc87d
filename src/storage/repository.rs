use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteExecutor, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, AccountType, Cents, TransactionKind, TransactionRecord,
};

use super::{MIGRATION_001_INITIAL, UnitOfWork, is_unique_violation_on};

/// Window into an account's history. Records come back oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Only records with a higher sequence number
    pub after_sequence: Option<i64>,
    /// Maximum number of records to return
    pub limit: Option<usize>,
}

impl HistoryPage {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(mut self, sequence: i64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of inserting a new account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAccountOutcome {
    Created,
    AlreadyExists,
}

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    /// Records whose account does not exist
    pub orphan_transactions: i64,
}

/// Repository for the balance store (`accounts`) and the transaction log
/// (`transactions`).
///
/// Reads go straight to the pool. The only write path into either table for
/// an existing account is a `UnitOfWork` obtained from `Repository::begin`,
/// which is reserved to the ledger engine.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

const TRANSACTION_COLUMNS: &str =
    "id, account_id, sequence, kind, amount_cents, recorded_at, resulting_balance, dedup_key";

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the pool described by `config`. The database file is created
    /// when `create` is set.
    pub async fn connect(config: &LedgerConfig, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout)
            .connect_with(options)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start an atomic unit of work against both stores.
    pub(crate) async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin storage transaction")?;
        Ok(UnitOfWork::new(tx))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Balance store
    // ========================

    /// Insert a freshly opened account.
    pub(crate) async fn save_account(&self, account: &Account) -> Result<SaveAccountOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, holder_name, account_type, balance, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.as_str())
        .bind(&account.holder_name)
        .bind(account.account_type.as_str())
        .bind(account.balance)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(SaveAccountOutcome::Created),
            Err(err) if is_unique_violation_on(&err, "accounts.id") => {
                Ok(SaveAccountOutcome::AlreadyExists)
            }
            Err(err) => Err(err).context("Failed to save account"),
        }
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        fetch_account(&self.pool, id).await
    }

    /// List all accounts ordered by ID.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, holder_name, account_type, balance, created_at
            FROM accounts
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(row_to_account).collect()
    }

    /// Current balance, or `None` for an unknown account.
    pub async fn get_balance(&self, id: &AccountId) -> Result<Option<Cents>> {
        fetch_balance(&self.pool, id).await
    }

    // ========================
    // Transaction log
    // ========================

    /// List an account's records, oldest first.
    pub async fn list_transactions(
        &self,
        account_id: &AccountId,
        page: HistoryPage,
    ) -> Result<Vec<TransactionRecord>> {
        fetch_transactions(&self.pool, account_id, page).await
    }

    /// Find the record committed under a caller's deduplication key.
    pub async fn find_by_dedup_key(
        &self,
        account_id: &AccountId,
        dedup_key: &str,
    ) -> Result<Option<TransactionRecord>> {
        fetch_by_dedup_key(&self.pool, account_id, dedup_key).await
    }

    /// Balance and full history read from one snapshot.
    pub async fn read_statement(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<(Cents, Vec<TransactionRecord>)>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin read transaction")?;

        let Some(balance) = fetch_balance(&mut *tx, account_id).await? else {
            return Ok(None);
        };
        let records = fetch_transactions(&mut *tx, account_id, HistoryPage::all()).await?;

        tx.commit().await.context("Failed to end read transaction")?;
        Ok(Some((balance, records)))
    }

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let orphan_transactions: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM transactions t
            WHERE NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.account_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count orphan transactions")?
        .get("count");

        Ok(IntegrityStats {
            orphan_transactions,
        })
    }
}

pub(crate) async fn fetch_account<'e>(
    executor: impl SqliteExecutor<'e>,
    id: &AccountId,
) -> Result<Option<Account>> {
    let row = sqlx::query(
        r#"
        SELECT id, holder_name, account_type, balance, created_at
        FROM accounts
        WHERE id = ?
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(executor)
    .await
    .context("Failed to fetch account")?;

    row.as_ref().map(row_to_account).transpose()
}

pub(crate) async fn fetch_balance<'e>(
    executor: impl SqliteExecutor<'e>,
    id: &AccountId,
) -> Result<Option<Cents>> {
    let row = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
        .bind(id.as_str())
        .fetch_optional(executor)
        .await
        .context("Failed to fetch balance")?;

    Ok(row.map(|row| row.get("balance")))
}

pub(crate) async fn fetch_transactions<'e>(
    executor: impl SqliteExecutor<'e>,
    account_id: &AccountId,
    page: HistoryPage,
) -> Result<Vec<TransactionRecord>> {
    // LIMIT -1 means no limit in SQLite
    let limit = page
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);

    let rows = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE account_id = ? AND sequence > ? ORDER BY sequence LIMIT ?",
        TRANSACTION_COLUMNS
    ))
    .bind(account_id.as_str())
    .bind(page.after_sequence.unwrap_or(0))
    .bind(limit)
    .fetch_all(executor)
    .await
    .context("Failed to list transactions")?;

    rows.iter().map(row_to_transaction).collect()
}

pub(crate) async fn fetch_by_dedup_key<'e>(
    executor: impl SqliteExecutor<'e>,
    account_id: &AccountId,
    dedup_key: &str,
) -> Result<Option<TransactionRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM transactions WHERE account_id = ? AND dedup_key = ?",
        TRANSACTION_COLUMNS
    ))
    .bind(account_id.as_str())
    .bind(dedup_key)
    .fetch_optional(executor)
    .await
    .context("Failed to look up deduplication key")?;

    row.as_ref().map(row_to_transaction).transpose()
}

fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let id_str: String = row.get("id");
    let account_type_str: String = row.get("account_type");
    let created_at_str: String = row.get("created_at");

    Ok(Account {
        id: AccountId::from_str(&id_str).context("Invalid account ID")?,
        holder_name: row.get("holder_name"),
        account_type: AccountType::from_str(&account_type_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid account type: {}", account_type_str))?,
        balance: row.get("balance"),
        created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<TransactionRecord> {
    let id_str: String = row.get("id");
    let account_id_str: String = row.get("account_id");
    let kind_str: String = row.get("kind");
    let recorded_at_str: String = row.get("recorded_at");

    Ok(TransactionRecord {
        id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
        account_id: AccountId::from_str(&account_id_str).context("Invalid account ID")?,
        sequence: row.get("sequence"),
        kind: TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
        amount_cents: row.get("amount_cents"),
        recorded_at: parse_timestamp(&recorded_at_str).context("Invalid recorded_at")?,
        resulting_balance: row.get("resulting_balance"),
        dedup_key: row.get("dedup_key"),
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
