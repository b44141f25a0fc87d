// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Result;
use ledgerline::application::LedgerService;
use ledgerline::config::LedgerConfig;
use ledgerline::domain::{AccountId, Cents};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tempfile::TempDir;

/// Configuration pointing at a fresh database inside `temp_dir`
pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    LedgerConfig::new(db_path(temp_dir))
}

pub fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("test.db")
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(&test_config(&temp_dir)).await?;
    Ok((service, temp_dir))
}

/// Take the database write lock from a connection outside any ledger service.
/// Engine writes wait (and eventually fail) until the lock is released.
pub async fn hold_write_lock(temp_dir: &TempDir) -> Result<SqliteConnection> {
    let mut conn = SqliteConnectOptions::new()
        .filename(db_path(temp_dir))
        .connect()
        .await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await?;
    Ok(conn)
}

pub async fn release_write_lock(mut conn: SqliteConnection) -> Result<()> {
    sqlx::query("ROLLBACK").execute(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

pub fn account_id(raw: &str) -> AccountId {
    AccountId::parse(raw).unwrap()
}

/// Test fixture: accounts opened with a starting balance
pub struct StandardAccounts;

impl StandardAccounts {
    /// Open an empty account
    pub async fn open(service: &LedgerService, id: &str) -> Result<AccountId> {
        let id = account_id(id);
        service.accounts().open_account(id.clone(), "Test Holder").await?;
        Ok(id)
    }

    /// Open an account and credit it with `balance`
    pub async fn open_funded(
        service: &LedgerService,
        id: &str,
        balance: Cents,
    ) -> Result<AccountId> {
        let id = Self::open(service, id).await?;
        if balance > 0 {
            service.engine().deposit(&id, balance).await?;
        }
        Ok(id)
    }
}
