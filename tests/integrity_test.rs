mod common;

use anyhow::Result;
use common::{StandardAccounts, db_path, test_service};
use ledgerline::application::LedgerRequest;
use ledgerline::domain::IntegrityIssue;
use ledgerline::io::{ExportFormat, Exporter, HistoryExport};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};

#[tokio::test]
async fn test_integrity_of_healthy_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = StandardAccounts::open_funded(&service, "A", 10000).await?;
    let b = StandardAccounts::open_funded(&service, "B", 2500).await?;
    service.engine().withdraw(&a, 4000).await?;
    let _ = service.engine().withdraw(&b, 9999).await;
    StandardAccounts::open(&service, "C").await?;

    let report = service.accounts().check_integrity().await?;
    assert!(report.is_healthy(), "{:?}", report.issues);
    assert_eq!(report.account_count, 3);
    assert_eq!(report.transaction_count, 3);
    assert_eq!(report.total_balance, 8500);

    Ok(())
}

#[tokio::test]
async fn test_integrity_detects_balance_changed_outside_engine() -> Result<()> {
    let (service, temp) = test_service().await?;
    let acc = StandardAccounts::open_funded(&service, "ACC-1", 10000).await?;

    let mut conn = SqliteConnectOptions::new()
        .filename(db_path(&temp))
        .connect()
        .await?;
    sqlx::query("UPDATE accounts SET balance = balance + 500 WHERE id = ?")
        .bind(acc.as_str())
        .execute(&mut conn)
        .await?;
    conn.close().await?;

    let report = service.accounts().check_integrity().await?;
    assert!(!report.is_healthy());
    assert_eq!(
        report.issues,
        vec![IntegrityIssue::BalanceMismatch {
            account: acc,
            stored: 10500,
            replayed: 10000,
        }]
    );

    Ok(())
}

#[tokio::test]
async fn test_integrity_detects_orphan_records() -> Result<()> {
    let (service, temp) = test_service().await?;
    StandardAccounts::open_funded(&service, "ACC-1", 100).await?;

    let mut conn = SqliteConnectOptions::new()
        .filename(db_path(&temp))
        .foreign_keys(false)
        .connect()
        .await?;
    sqlx::query(
        r#"
        INSERT INTO transactions (id, account_id, sequence, kind, amount_cents, recorded_at, resulting_balance)
        VALUES ('00000000-0000-0000-0000-000000000001', 'GHOST', 1, 'credit', 100, '2024-01-01T00:00:00+00:00', 100)
        "#,
    )
    .execute(&mut conn)
    .await?;
    conn.close().await?;

    let report = service.accounts().check_integrity().await?;
    assert_eq!(report.issues, vec![IntegrityIssue::OrphanRecords { count: 1 }]);

    Ok(())
}

#[tokio::test]
async fn test_log_is_append_only() -> Result<()> {
    let (service, temp) = test_service().await?;
    StandardAccounts::open_funded(&service, "ACC-1", 100).await?;

    let mut conn = SqliteConnectOptions::new()
        .filename(db_path(&temp))
        .connect()
        .await?;
    let update = sqlx::query("UPDATE transactions SET amount_cents = 1")
        .execute(&mut conn)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM transactions").execute(&mut conn).await;
    assert!(delete.is_err());
    conn.close().await?;

    assert!(service.accounts().check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_export_history_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let acc = StandardAccounts::open_funded(&service, "ACC-1", 10000).await?;
    service
        .engine()
        .debit(LedgerRequest::new(acc.clone(), 2550).with_dedup_key("rent"))
        .await?;

    let mut out = Vec::new();
    let count = Exporter::new(&service)
        .export_history(&acc, ExportFormat::Csv, &mut out)
        .await?;
    assert_eq!(count, 2);

    let text = String::from_utf8(out)?;
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(
        lines[0],
        "id,sequence,recorded_at,kind,amount,resulting_balance,dedup_key"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains(",1,"));
    assert!(lines[1].ends_with(",credit,100.00,100.00,"));
    assert!(lines[2].ends_with(",debit,25.50,74.50,rent"));

    Ok(())
}

#[tokio::test]
async fn test_export_history_json() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let acc = StandardAccounts::open_funded(&service, "ACC-1", 10000).await?;
    service.engine().withdraw(&acc, 100).await?;

    let mut out = Vec::new();
    let export = Exporter::new(&service)
        .export_history_json(&acc, &mut out)
        .await?;
    assert_eq!(export.balance_cents, 9900);

    let parsed: HistoryExport = serde_json::from_slice(&out)?;
    assert_eq!(parsed.account_id, acc);
    assert_eq!(parsed.balance_cents, 9900);
    assert_eq!(parsed.transactions, export.transactions);
    assert_eq!(parsed.transactions[1].resulting_balance, 9900);

    Ok(())
}

#[tokio::test]
async fn test_export_unknown_account_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let missing = common::account_id("NOPE");

    let result = Exporter::new(&service)
        .export_history(&missing, ExportFormat::Json, Vec::new())
        .await;
    assert!(result.is_err());

    Ok(())
}
