use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{AccountId, Cents, TransactionRecord, format_cents};

/// Output formats supported by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// One account's statement as written by the JSON export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub account_id: AccountId,
    pub balance_cents: Cents,
    pub transactions: Vec<TransactionRecord>,
}

/// Exporter for an account's transaction history
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Write the history in `format`; returns the number of records written.
    pub async fn export_history<W: Write>(
        &self,
        account_id: &AccountId,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize> {
        match format {
            ExportFormat::Csv => self.export_history_csv(account_id, writer).await,
            ExportFormat::Json => {
                let export = self.export_history_json(account_id, writer).await?;
                Ok(export.transactions.len())
            }
        }
    }

    /// Export an account's records to CSV, oldest first
    pub async fn export_history_csv<W: Write>(
        &self,
        account_id: &AccountId,
        writer: W,
    ) -> Result<usize> {
        let statement = self.service.queries().get_statement(account_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "recorded_at",
            "kind",
            "amount",
            "resulting_balance",
            "dedup_key",
        ])?;

        for record in &statement.records {
            csv_writer.write_record([
                record.id.to_string(),
                record.sequence.to_string(),
                record.recorded_at.to_rfc3339(),
                record.kind.as_str().to_string(),
                format_cents(record.amount_cents),
                format_cents(record.resulting_balance),
                record.dedup_key.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(statement.records.len())
    }

    /// Export balance and history as one pretty-printed JSON document
    pub async fn export_history_json<W: Write>(
        &self,
        account_id: &AccountId,
        mut writer: W,
    ) -> Result<HistoryExport> {
        let statement = self.service.queries().get_statement(account_id).await?;

        let export = HistoryExport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            account_id: statement.account_id,
            balance_cents: statement.balance,
            transactions: statement.records,
        };

        let json = serde_json::to_string_pretty(&export)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(export)
    }
}
