use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default database file, relative to the working directory.
pub const DEFAULT_DATABASE: &str = "ledgerline.db";

/// Runtime settings shared by the storage layer and the ledger engine.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long SQLite waits on a locked database before giving up
    pub busy_timeout: Duration,
    /// Deadline for one ledger operation, including waiting for the account lock
    pub operation_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl LedgerConfig {
    pub fn new(database_path: impl AsRef<Path>) -> Self {
        Self {
            database_path: database_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}
