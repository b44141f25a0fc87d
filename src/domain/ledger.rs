use std::fmt;

use super::{Account, AccountId, Cents, TransactionKind, TransactionRecord};

/// Reject amounts that cannot be posted. Direction lives in the kind, so only
/// strictly positive amounts are valid.
pub fn validate_amount(amount_cents: Cents) -> Result<(), PostingError> {
    if amount_cents <= 0 {
        return Err(PostingError::NonPositiveAmount(amount_cents));
    }
    Ok(())
}

/// Balance after applying `amount_cents` of `kind` to `current`.
pub fn next_balance(
    current: Cents,
    kind: TransactionKind,
    amount_cents: Cents,
) -> Result<Cents, PostingError> {
    validate_amount(amount_cents)?;
    let next = current
        .checked_add(kind.signed(amount_cents))
        .ok_or(PostingError::Overflow)?;
    if next < 0 {
        return Err(PostingError::InsufficientFunds {
            balance: current,
            requested: amount_cents,
        });
    }
    Ok(next)
}

/// Replay a log from the opening balance of zero.
/// Balance = sum of credits - sum of debits
pub fn compute_balance(records: &[TransactionRecord]) -> Cents {
    records.iter().map(TransactionRecord::delta).sum()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingError {
    NonPositiveAmount(Cents),
    InsufficientFunds { balance: Cents, requested: Cents },
    Overflow,
}

impl fmt::Display for PostingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostingError::NonPositiveAmount(amount) => {
                write!(f, "amount must be positive, got {} cents", amount)
            }
            PostingError::InsufficientFunds { balance, requested } => write!(
                f,
                "balance of {} cents cannot cover {} cents",
                balance, requested
            ),
            PostingError::Overflow => write!(f, "balance would overflow"),
        }
    }
}

impl std::error::Error for PostingError {}

/// A single inconsistency found while auditing the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    NegativeBalance {
        account: AccountId,
        balance: Cents,
    },
    BalanceMismatch {
        account: AccountId,
        stored: Cents,
        replayed: Cents,
    },
    NonPositiveAmount {
        account: AccountId,
        sequence: i64,
        amount: Cents,
    },
    SequenceGap {
        account: AccountId,
        expected: i64,
        found: i64,
    },
    SnapshotMismatch {
        account: AccountId,
        sequence: i64,
        recorded: Cents,
        replayed: Cents,
    },
    /// Records pointing at an account that does not exist
    OrphanRecords { count: i64 },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::NegativeBalance { account, balance } => {
                write!(f, "{}: negative balance {}", account, balance)
            }
            IntegrityIssue::BalanceMismatch {
                account,
                stored,
                replayed,
            } => write!(
                f,
                "{}: stored balance {} but log replays to {}",
                account, stored, replayed
            ),
            IntegrityIssue::NonPositiveAmount {
                account,
                sequence,
                amount,
            } => write!(
                f,
                "{}: record #{} has non-positive amount {}",
                account, sequence, amount
            ),
            IntegrityIssue::SequenceGap {
                account,
                expected,
                found,
            } => write!(
                f,
                "{}: expected record #{} but found #{}",
                account, expected, found
            ),
            IntegrityIssue::SnapshotMismatch {
                account,
                sequence,
                recorded,
                replayed,
            } => write!(
                f,
                "{}: record #{} snapshots balance {} but replay gives {}",
                account, sequence, recorded, replayed
            ),
            IntegrityIssue::OrphanRecords { count } => {
                write!(f, "{} transaction(s) reference unknown accounts", count)
            }
        }
    }
}

/// Outcome of a full ledger audit.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check one account against its own log. `records` must be ordered by sequence.
pub fn audit_account(account: &Account, records: &[TransactionRecord]) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();
    let mut running: Cents = 0;

    if account.balance < 0 {
        issues.push(IntegrityIssue::NegativeBalance {
            account: account.id.clone(),
            balance: account.balance,
        });
    }

    for (expected, record) in (1..).zip(records) {
        if record.sequence != expected {
            issues.push(IntegrityIssue::SequenceGap {
                account: account.id.clone(),
                expected,
                found: record.sequence,
            });
        }
        if record.amount_cents <= 0 {
            issues.push(IntegrityIssue::NonPositiveAmount {
                account: account.id.clone(),
                sequence: record.sequence,
                amount: record.amount_cents,
            });
        }

        running = running.saturating_add(record.delta());
        if record.resulting_balance != running {
            issues.push(IntegrityIssue::SnapshotMismatch {
                account: account.id.clone(),
                sequence: record.sequence,
                recorded: record.resulting_balance,
                replayed: running,
            });
        }
    }

    if running != account.balance {
        issues.push(IntegrityIssue::BalanceMismatch {
            account: account.id.clone(),
            stored: account.balance,
            replayed: running,
        });
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_id() -> AccountId {
        AccountId::parse("ACC-1").unwrap()
    }

    /// Build a consistent log from (kind, amount) pairs.
    fn make_log(entries: &[(TransactionKind, Cents)]) -> Vec<TransactionRecord> {
        let mut balance = 0;
        entries
            .iter()
            .enumerate()
            .map(|(i, (kind, amount))| {
                balance = next_balance(balance, *kind, *amount).unwrap();
                let mut record = TransactionRecord::new(account_id(), *kind, *amount);
                record.sequence = i as i64 + 1;
                record.resulting_balance = balance;
                record
            })
            .collect()
    }

    fn account_with_balance(balance: Cents) -> Account {
        let mut account = Account::open(account_id(), "Ada");
        account.balance = balance;
        account
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1).is_ok());
        assert_eq!(validate_amount(0), Err(PostingError::NonPositiveAmount(0)));
        assert_eq!(
            validate_amount(-100),
            Err(PostingError::NonPositiveAmount(-100))
        );
    }

    #[test]
    fn test_next_balance_credit_and_debit() {
        assert_eq!(next_balance(10000, TransactionKind::Credit, 5000), Ok(15000));
        assert_eq!(next_balance(10000, TransactionKind::Debit, 3000), Ok(7000));
    }

    #[test]
    fn test_next_balance_allows_full_debit() {
        assert_eq!(next_balance(7000, TransactionKind::Debit, 7000), Ok(0));
    }

    #[test]
    fn test_next_balance_rejects_overdraft() {
        assert_eq!(
            next_balance(7000, TransactionKind::Debit, 8000),
            Err(PostingError::InsufficientFunds {
                balance: 7000,
                requested: 8000
            })
        );
    }

    #[test]
    fn test_next_balance_rejects_overflow() {
        assert_eq!(
            next_balance(i64::MAX, TransactionKind::Credit, 1),
            Err(PostingError::Overflow)
        );
    }

    #[test]
    fn test_compute_balance_empty() {
        assert_eq!(compute_balance(&[]), 0);
    }

    #[test]
    fn test_compute_balance_mixed() {
        let log = make_log(&[
            (TransactionKind::Credit, 10000),
            (TransactionKind::Debit, 3000),
            (TransactionKind::Credit, 5000),
        ]);
        assert_eq!(compute_balance(&log), 12000);
        assert_eq!(log.last().unwrap().resulting_balance, 12000);
    }

    #[test]
    fn test_audit_consistent_account() {
        let log = make_log(&[
            (TransactionKind::Credit, 10000),
            (TransactionKind::Debit, 10000),
        ]);
        assert!(audit_account(&account_with_balance(0), &log).is_empty());
    }

    #[test]
    fn test_audit_detects_balance_without_record() {
        let log = make_log(&[(TransactionKind::Credit, 10000)]);
        let issues = audit_account(&account_with_balance(7000), &log);
        assert_eq!(
            issues,
            vec![IntegrityIssue::BalanceMismatch {
                account: account_id(),
                stored: 7000,
                replayed: 10000,
            }]
        );
    }

    #[test]
    fn test_audit_detects_sequence_gap_and_bad_snapshot() {
        let mut log = make_log(&[
            (TransactionKind::Credit, 10000),
            (TransactionKind::Credit, 500),
        ]);
        log[1].sequence = 3;
        log[1].resulting_balance = 1;

        let issues = audit_account(&account_with_balance(10500), &log);
        assert!(issues.contains(&IntegrityIssue::SequenceGap {
            account: account_id(),
            expected: 2,
            found: 3,
        }));
        assert!(issues.contains(&IntegrityIssue::SnapshotMismatch {
            account: account_id(),
            sequence: 3,
            recorded: 1,
            replayed: 10500,
        }));
    }

    #[test]
    fn test_audit_detects_negative_balance() {
        let issues = audit_account(&account_with_balance(-1), &[]);
        assert!(issues.contains(&IntegrityIssue::NegativeBalance {
            account: account_id(),
            balance: -1,
        }));
    }

    #[test]
    fn test_report_health() {
        let mut report = IntegrityReport::default();
        assert!(report.is_healthy());
        report.issues.push(IntegrityIssue::NegativeBalance {
            account: account_id(),
            balance: -5,
        });
        assert!(!report.is_healthy());
    }
}
