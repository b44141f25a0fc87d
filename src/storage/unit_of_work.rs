use anyhow::{Context, Result};
use sqlx::{Row, Sqlite, Transaction};

use crate::domain::{AccountId, Cents, TransactionRecord};

use super::is_unique_violation_on;
use super::repository::{fetch_balance, fetch_by_dedup_key, parse_timestamp};

/// Result of a guarded balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeltaOutcome {
    /// The balance moved; carries the new value
    Applied(Cents),
    /// The account exists but the delta would cross the floor
    Rejected { current: Cents },
    AccountNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    Appended,
    /// Another record of the account already carries this deduplication key
    DuplicateKey,
}

/// One storage transaction spanning the balance store and the transaction log.
///
/// Nothing is visible to other connections until [`UnitOfWork::commit`].
/// Dropping the unit without committing rolls everything back, which is what
/// makes an abandoned or timed-out operation leave no trace.
pub(crate) struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub(crate) async fn get_balance(&mut self, account_id: &AccountId) -> Result<Option<Cents>> {
        fetch_balance(&mut *self.tx, account_id).await
    }

    /// Add `delta` to the account balance, unless the result would fall below
    /// `floor` or overflow.
    ///
    /// The bound check and the write are one `UPDATE` statement, so no other
    /// writer can slip in between them.
    pub(crate) async fn apply_delta(
        &mut self,
        account_id: &AccountId,
        delta: Cents,
        floor: Cents,
    ) -> Result<DeltaOutcome> {
        // balance + delta in [floor, i64::MAX]  <=>  balance in [lower, upper]
        let lower = floor.saturating_sub(delta);
        let upper = if delta > 0 { i64::MAX - delta } else { i64::MAX };

        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + ?
            WHERE id = ? AND balance >= ? AND balance <= ?
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(account_id.as_str())
        .bind(lower)
        .bind(upper)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to apply balance delta")?;

        if let Some(row) = row {
            return Ok(DeltaOutcome::Applied(row.get("balance")));
        }

        Ok(match self.get_balance(account_id).await? {
            Some(current) => DeltaOutcome::Rejected { current },
            None => DeltaOutcome::AccountNotFound,
        })
    }

    /// Append a record to the account's log.
    ///
    /// Assigns the next per-account sequence number and pulls `recorded_at`
    /// forward if the clock is behind the previous record.
    pub(crate) async fn append(&mut self, record: &mut TransactionRecord) -> Result<AppendOutcome> {
        let last = sqlx::query(
            r#"
            SELECT sequence, recorded_at
            FROM transactions
            WHERE account_id = ?
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(record.account_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to read last transaction")?;

        record.sequence = 1;
        if let Some(last) = last {
            let last_sequence: i64 = last.get("sequence");
            let last_recorded_at: String = last.get("recorded_at");
            let last_recorded_at =
                parse_timestamp(&last_recorded_at).context("Invalid recorded_at")?;

            record.sequence = last_sequence + 1;
            record.recorded_at = record.recorded_at.max(last_recorded_at);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (id, account_id, sequence, kind, amount_cents, recorded_at, resulting_balance, dedup_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.account_id.as_str())
        .bind(record.sequence)
        .bind(record.kind.as_str())
        .bind(record.amount_cents)
        .bind(record.recorded_at.to_rfc3339())
        .bind(record.resulting_balance)
        .bind(&record.dedup_key)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(AppendOutcome::Appended),
            Err(err) if is_unique_violation_on(&err, "dedup_key") => {
                Ok(AppendOutcome::DuplicateKey)
            }
            Err(err) => Err(err).context("Failed to append transaction"),
        }
    }

    /// Look up a deduplication key as seen by this unit.
    pub(crate) async fn find_by_dedup_key(
        &mut self,
        account_id: &AccountId,
        dedup_key: &str,
    ) -> Result<Option<TransactionRecord>> {
        fetch_by_dedup_key(&mut *self.tx, account_id, dedup_key).await
    }

    /// Publish every change made through this unit.
    pub(crate) async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit storage transaction")
    }

    /// Discard every change made through this unit.
    pub(crate) async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back storage transaction")
    }
}
