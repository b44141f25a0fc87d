use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money in (deposit)
    Credit,
    /// Money out (withdrawal)
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "credit" => Some(TransactionKind::Credit),
            "debit" => Some(TransactionKind::Debit),
            _ => None,
        }
    }

    /// Signed balance change for a positive amount of this kind.
    pub fn signed(&self, amount_cents: Cents) -> Cents {
        match self {
            TransactionKind::Credit => amount_cents,
            TransactionKind::Debit => -amount_cents,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One committed credit or debit against an account.
/// Records are immutable and only ever appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// Per-account position in the log, starting at 1 with no gaps
    pub sequence: i64,
    pub kind: TransactionKind,
    /// Amount in cents (always positive)
    pub amount_cents: Cents,
    /// Commit time, never earlier than the previous record of the account
    pub recorded_at: DateTime<Utc>,
    /// Account balance right after this record was applied
    pub resulting_balance: Cents,
    /// Caller-supplied idempotency key
    pub dedup_key: Option<String>,
}

impl TransactionRecord {
    /// Build a record for the log. Sequence and timestamp are assigned when the
    /// record is appended.
    pub fn new(account_id: AccountId, kind: TransactionKind, amount_cents: Cents) -> Self {
        assert!(amount_cents > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            sequence: 0,
            kind,
            amount_cents,
            recorded_at: Utc::now(),
            resulting_balance: 0,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Signed effect of this record on the balance.
    pub fn delta(&self) -> Cents {
        self.kind.signed(self.amount_cents)
    }
}
