// Application layer - use cases and orchestration over the storage layer.

mod engine;
mod error;
mod locks;
mod query;
mod service;

pub use engine::{LedgerEngine, LedgerRequest, MAX_DEDUP_KEY_LEN, Posting};
pub use error::AppError;
pub use locks::{AccountGuard, AccountLocks};
pub use query::{AccountQueryService, Statement};
pub use service::{AccountService, LedgerService};
