mod repository;
mod unit_of_work;

pub use repository::*;
pub(crate) use unit_of_work::{AppendOutcome, DeltaOutcome, UnitOfWork};

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

// SQLite primary result codes
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Whether a storage failure is worth retrying: the pool or the database file
/// was momentarily unavailable, nothing about the request itself was wrong.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(is_transient_sqlx)
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i64>().ok())
            // extended codes carry the primary code in the low byte
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}

/// Whether the failure was a UNIQUE/PRIMARY KEY violation on the named column.
pub(crate) fn is_unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.message().contains(column),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: anyhow::Result<()> = Err(sqlx::Error::PoolTimedOut).context("Failed to fetch");
        assert!(is_transient(&err.unwrap_err()));
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err: anyhow::Result<()> = Err(sqlx::Error::RowNotFound).context("Failed to fetch");
        assert!(!is_transient(&err.unwrap_err()));
    }

    #[test]
    fn test_plain_error_is_not_transient() {
        assert!(!is_transient(&anyhow::anyhow!("boom")));
    }
}
