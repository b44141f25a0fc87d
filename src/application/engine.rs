use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AccountId, Cents, PostingError, TransactionKind, TransactionRecord, next_balance,
    validate_amount,
};
use crate::storage::{AppendOutcome, DeltaOutcome, Repository, UnitOfWork};

use super::{AccountGuard, AccountLocks, AppError};

/// Longest deduplication key accepted from callers.
pub const MAX_DEDUP_KEY_LEN: usize = 128;

/// A credit or debit as submitted by the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRequest {
    pub account_id: AccountId,
    pub amount_cents: Cents,
    /// Identifies one logical request across retries
    pub dedup_key: Option<String>,
}

impl LedgerRequest {
    pub fn new(account_id: AccountId, amount_cents: Cents) -> Self {
        Self {
            account_id,
            amount_cents,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

/// A committed credit or debit.
#[derive(Debug, Clone)]
pub struct Posting {
    pub record: TransactionRecord,
    pub new_balance: Cents,
    /// The request matched an earlier commit; nothing was written this time
    pub replayed: bool,
}

/// The only write path into the balance store and the transaction log.
///
/// Every operation on an account runs under that account's lock and inside one
/// storage transaction: the funds check, the balance update and the log append
/// commit together or not at all. Operations on different accounts only meet
/// at the storage layer.
#[derive(Clone)]
pub struct LedgerEngine {
    repo: Repository,
    locks: Arc<AccountLocks>,
    operation_timeout: Duration,
}

impl LedgerEngine {
    pub fn new(repo: Repository, operation_timeout: Duration) -> Self {
        Self {
            repo,
            locks: Arc::new(AccountLocks::new()),
            operation_timeout,
        }
    }

    /// Increase the balance of an account and log a `credit` record.
    pub async fn credit(&self, request: LedgerRequest) -> Result<Posting, AppError> {
        self.post(TransactionKind::Credit, request).await
    }

    /// Decrease the balance of an account and log a `debit` record.
    /// Fails with `InsufficientFunds` if the balance at commit cannot cover it.
    pub async fn debit(&self, request: LedgerRequest) -> Result<Posting, AppError> {
        self.post(TransactionKind::Debit, request).await
    }

    /// Deposit without a deduplication key; returns the new balance.
    pub async fn deposit(
        &self,
        account_id: &AccountId,
        amount_cents: Cents,
    ) -> Result<Cents, AppError> {
        let posting = self
            .credit(LedgerRequest::new(account_id.clone(), amount_cents))
            .await?;
        Ok(posting.new_balance)
    }

    /// Withdraw without a deduplication key; returns the new balance.
    pub async fn withdraw(
        &self,
        account_id: &AccountId,
        amount_cents: Cents,
    ) -> Result<Cents, AppError> {
        let posting = self
            .debit(LedgerRequest::new(account_id.clone(), amount_cents))
            .await?;
        Ok(posting.new_balance)
    }

    #[instrument(
        name = "ledger.post",
        skip(self, kind, request),
        fields(
            account_id = %request.account_id,
            kind = %kind,
            amount = request.amount_cents,
            dedup_key = request.dedup_key.as_deref(),
        )
    )]
    async fn post(
        &self,
        kind: TransactionKind,
        request: LedgerRequest,
    ) -> Result<Posting, AppError> {
        let result = match validate_request(&request) {
            Ok(()) => self.post_with_deadline(kind, &request).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(posting) if posting.replayed => info!(
                new_balance = posting.new_balance,
                transaction_id = %posting.record.id,
                "replayed committed request"
            ),
            Ok(posting) => info!(
                new_balance = posting.new_balance,
                transaction_id = %posting.record.id,
                sequence = posting.record.sequence,
                "posted"
            ),
            Err(err) if err.is_rejection() => warn!(error = %err, "rejected"),
            Err(err) => error!(error = %err, retryable = err.is_retryable(), "failed"),
        }

        result
    }

    /// The deadline covers waiting for the account lock and every step up to
    /// the commit. Dropping the prepared unit on expiry rolls it back, so a
    /// timed-out operation applies nothing. The commit itself is never cut
    /// short: once it is issued, its real outcome is what the caller gets.
    async fn post_with_deadline(
        &self,
        kind: TransactionKind,
        request: &LedgerRequest,
    ) -> Result<Posting, AppError> {
        let prepared =
            match tokio::time::timeout(self.operation_timeout, self.prepare(kind, request)).await {
                Ok(prepared) => prepared?,
                Err(_) => {
                    return Err(AppError::StorageUnavailable(anyhow::anyhow!(
                        "operation did not complete within {:?}",
                        self.operation_timeout
                    )));
                }
            };

        match prepared {
            Prepared::Replayed(posting) => Ok(posting),
            Prepared::Pending {
                guard: _guard,
                unit,
                record,
            } => {
                // Runs to completion even if the caller stops waiting.
                tokio::spawn(unit.commit()).await.map_err(|err| {
                    AppError::Database(anyhow::anyhow!("commit task failed: {}", err))
                })??;
                debug!("committed");

                Ok(Posting {
                    new_balance: record.resulting_balance,
                    record,
                    replayed: false,
                })
            }
        }
    }

    /// Everything before the commit, under the account lock. A pending unit is
    /// returned together with the guard so the lock spans the commit.
    async fn prepare(
        &self,
        kind: TransactionKind,
        request: &LedgerRequest,
    ) -> Result<Prepared<'_>, AppError> {
        let guard = self.locks.lock(&request.account_id).await;
        debug!("account lock acquired");

        if let Some(key) = &request.dedup_key {
            if let Some(existing) = self.repo.find_by_dedup_key(&request.account_id, key).await? {
                return replay(kind, request, existing).map(Prepared::Replayed);
            }
        }

        let mut unit = self.repo.begin().await?;
        match self.apply(&mut unit, kind, request).await? {
            Applied::Posted(record) => Ok(Prepared::Pending {
                guard,
                unit,
                record,
            }),
            Applied::Duplicate(existing) => {
                unit.rollback().await?;
                replay(kind, request, existing).map(Prepared::Replayed)
            }
        }
    }

    /// Check, mutate and log inside `unit`. Nothing here is visible until the
    /// caller commits; any early return leaves the unit to be rolled back.
    async fn apply(
        &self,
        unit: &mut UnitOfWork,
        kind: TransactionKind,
        request: &LedgerRequest,
    ) -> Result<Applied, AppError> {
        let account_id = &request.account_id;

        let new_balance = match unit
            .apply_delta(account_id, kind.signed(request.amount_cents), 0)
            .await?
        {
            DeltaOutcome::Applied(balance) => balance,
            DeltaOutcome::AccountNotFound => {
                return Err(AppError::AccountNotFound(account_id.clone()));
            }
            DeltaOutcome::Rejected { current } => {
                return Err(rejection(account_id, current, kind, request.amount_cents));
            }
        };

        if new_balance < 0 {
            return Err(AppError::ConsistencyViolation(format!(
                "balance of {} went negative ({})",
                account_id, new_balance
            )));
        }

        let mut record = TransactionRecord::new(account_id.clone(), kind, request.amount_cents);
        record.resulting_balance = new_balance;
        record.dedup_key = request.dedup_key.clone();

        match unit.append(&mut record).await? {
            AppendOutcome::Appended => Ok(Applied::Posted(record)),
            AppendOutcome::DuplicateKey => {
                // committed by another process between our lookup and our insert
                let key = request.dedup_key.as_deref().unwrap_or_default();
                let existing = unit
                    .find_by_dedup_key(account_id, key)
                    .await?
                    .ok_or_else(|| {
                        AppError::ConsistencyViolation(format!(
                            "deduplication key '{}' reported as taken but not found",
                            key
                        ))
                    })?;
                Ok(Applied::Duplicate(existing))
            }
        }
    }
}

enum Applied {
    Posted(TransactionRecord),
    Duplicate(TransactionRecord),
}

enum Prepared<'a> {
    Replayed(Posting),
    /// Applied and logged inside `unit`, waiting to be committed
    Pending {
        guard: AccountGuard<'a>,
        unit: UnitOfWork,
        record: TransactionRecord,
    },
}

/// Explain why storage refused to move `current` by the requested amount.
fn rejection(
    account_id: &AccountId,
    current: Cents,
    kind: TransactionKind,
    amount_cents: Cents,
) -> AppError {
    match next_balance(current, kind, amount_cents) {
        Err(PostingError::InsufficientFunds { balance, requested }) => {
            AppError::InsufficientFunds {
                account: account_id.clone(),
                balance,
                required: requested,
            }
        }
        Err(err) => AppError::InvalidAmount(err.to_string()),
        Ok(next) => AppError::ConsistencyViolation(format!(
            "storage refused to move {} from {} to {}",
            account_id, current, next
        )),
    }
}

fn validate_request(request: &LedgerRequest) -> Result<(), AppError> {
    validate_amount(request.amount_cents).map_err(|e| AppError::InvalidAmount(e.to_string()))?;

    if let Some(key) = &request.dedup_key {
        if key.trim().is_empty() || key.len() > MAX_DEDUP_KEY_LEN {
            return Err(AppError::InvalidDedupKey(format!(
                "must be 1 to {} bytes",
                MAX_DEDUP_KEY_LEN
            )));
        }
    }
    Ok(())
}

/// Answer a retried request with its original outcome, provided it really is
/// the same request.
fn replay(
    kind: TransactionKind,
    request: &LedgerRequest,
    existing: TransactionRecord,
) -> Result<Posting, AppError> {
    if existing.kind != kind || existing.amount_cents != request.amount_cents {
        return Err(AppError::IdempotencyConflict {
            account: request.account_id.clone(),
            key: existing.dedup_key.unwrap_or_default(),
        });
    }

    Ok(Posting {
        new_balance: existing.resulting_balance,
        record: existing,
        replayed: true,
    })
}
