use tracing::info;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, IntegrityIssue, IntegrityReport, TransactionRecord, audit_account,
};
use crate::storage::{HistoryPage, Repository, SaveAccountOutcome};

use super::{AccountQueryService, AppError, LedgerEngine};

/// Account lifecycle and audits. Opening an account is the hook the external
/// signup flow calls once it has validated the holder.
#[derive(Clone)]
pub struct AccountService {
    repo: Repository,
}

impl AccountService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Open an account with a zero balance.
    pub async fn open_account(
        &self,
        account_id: AccountId,
        holder_name: impl Into<String>,
    ) -> Result<Account, AppError> {
        let account = Account::open(account_id, holder_name);

        match self.repo.save_account(&account).await? {
            SaveAccountOutcome::Created => {
                info!(account_id = %account.id, "account opened");
                Ok(account)
            }
            SaveAccountOutcome::AlreadyExists => Err(AppError::AccountAlreadyExists(account.id)),
        }
    }

    pub async fn get_account(&self, account_id: &AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(account_id.clone()))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    /// Replay every account's log against its stored balance.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.repo.get_integrity_stats().await?;
        let accounts = self.repo.list_accounts().await?;

        let mut report = IntegrityReport::default();
        for account in &accounts {
            // Each account is read as its own snapshot; the engine commits
            // balance and record together, so a snapshot is never torn.
            let Some((balance, records)) = self.repo.read_statement(&account.id).await? else {
                continue;
            };
            let snapshot = Account {
                balance,
                ..account.clone()
            };

            report.account_count += 1;
            report.transaction_count += records.len();
            report.total_balance = report.total_balance.saturating_add(balance);
            report.issues.extend(audit_account(&snapshot, &records));
        }

        if stats.orphan_transactions > 0 {
            report.issues.push(IntegrityIssue::OrphanRecords {
                count: stats.orphan_transactions,
            });
        }

        Ok(report)
    }
}

/// Entry point bundling the engine and its read-side services over one
/// repository. This is the primary interface for any client (CLI, API, etc.).
pub struct LedgerService {
    repo: Repository,
    engine: LedgerEngine,
    queries: AccountQueryService,
    accounts: AccountService,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: &LedgerConfig) -> Self {
        Self {
            engine: LedgerEngine::new(repo.clone(), config.operation_timeout),
            queries: AccountQueryService::new(repo.clone()),
            accounts: AccountService::new(repo.clone()),
            repo,
        }
    }

    /// Initialize a new database (or upgrade an existing one) and connect.
    pub async fn init(config: &LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::init(config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config, false).await?;
        Ok(Self::new(repo, config))
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub fn queries(&self) -> &AccountQueryService {
        &self.queries
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    /// History of one account, paged.
    pub async fn history(
        &self,
        account_id: &AccountId,
        page: HistoryPage,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        self.queries.get_history_page(account_id, page).await
    }

    /// Close the connection pool, waiting for in-flight work to finish.
    pub async fn close(&self) {
        self.repo.close().await;
    }
}
