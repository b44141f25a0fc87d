use crate::domain::{AccountId, Cents, TransactionRecord};
use crate::storage::{HistoryPage, Repository};

use super::AppError;

/// Balance and history read from one storage snapshot.
#[derive(Debug, Clone)]
pub struct Statement {
    pub account_id: AccountId,
    pub balance: Cents,
    pub records: Vec<TransactionRecord>,
}

/// Read-only projections over the balance store and the transaction log.
///
/// Every read sees committed state only, so a balance is never observed
/// without the record that produced it.
#[derive(Clone)]
pub struct AccountQueryService {
    repo: Repository,
}

impl AccountQueryService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn get_balance(&self, account_id: &AccountId) -> Result<Cents, AppError> {
        self.repo
            .get_balance(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.clone()))
    }

    /// Full history, oldest first.
    pub async fn get_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        self.get_history_page(account_id, HistoryPage::all()).await
    }

    /// One page of history. Pass the last seen sequence as `after_sequence`
    /// to continue.
    pub async fn get_history_page(
        &self,
        account_id: &AccountId,
        page: HistoryPage,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let records = self.repo.list_transactions(account_id, page).await?;

        // An empty page is ambiguous: no records yet, or no such account.
        if records.is_empty() && self.repo.get_balance(account_id).await?.is_none() {
            return Err(AppError::AccountNotFound(account_id.clone()));
        }
        Ok(records)
    }

    pub async fn get_statement(&self, account_id: &AccountId) -> Result<Statement, AppError> {
        let (balance, records) = self
            .repo
            .read_statement(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.clone()))?;

        Ok(Statement {
            account_id: account_id.clone(),
            balance,
            records,
        })
    }
}
