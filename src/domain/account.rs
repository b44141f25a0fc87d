use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Cents;

/// Maximum length of an account identifier, in characters.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

/// Opaque, stable identifier of an account.
///
/// The ledger never interprets the value; it only requires it to be non-empty
/// and free of surrounding whitespace so that the same holder always resolves
/// to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidAccountId> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidAccountId::Empty);
        }
        if trimmed.chars().count() > MAX_ACCOUNT_ID_LEN {
            return Err(InvalidAccountId::TooLong(trimmed.chars().count()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(InvalidAccountId::ControlCharacter);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = InvalidAccountId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl std::str::FromStr for AccountId {
    type Err = InvalidAccountId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidAccountId {
    Empty,
    TooLong(usize),
    ControlCharacter,
}

impl fmt::Display for InvalidAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidAccountId::Empty => write!(f, "account id must not be empty"),
            InvalidAccountId::TooLong(len) => write!(
                f,
                "account id is {} characters long (max {})",
                len, MAX_ACCOUNT_ID_LEN
            ),
            InvalidAccountId::ControlCharacter => {
                write!(f, "account id must not contain control characters")
            }
        }
    }
}

impl std::error::Error for InvalidAccountId {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Default type assigned when an account is opened
    Savings,
    Current,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Current => "current",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "savings" => Some(AccountType::Savings),
            "current" => Some(AccountType::Current),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An account holder's single balance.
///
/// Only the ledger engine changes `balance`; this struct is a read snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub holder_name: String,
    pub account_type: AccountType,
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A freshly opened account: zero balance, savings type.
    pub fn open(id: AccountId, holder_name: impl Into<String>) -> Self {
        Self {
            id,
            holder_name: holder_name.into(),
            account_type: AccountType::Savings,
            balance: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_is_trimmed() {
        let id = AccountId::parse("  ACC-001 ").unwrap();
        assert_eq!(id.as_str(), "ACC-001");
    }

    #[test]
    fn test_account_id_rejects_empty() {
        assert_eq!(AccountId::parse("   "), Err(InvalidAccountId::Empty));
        assert_eq!(AccountId::parse(""), Err(InvalidAccountId::Empty));
    }

    #[test]
    fn test_account_id_rejects_overlong() {
        let raw = "x".repeat(MAX_ACCOUNT_ID_LEN + 1);
        assert_eq!(
            AccountId::parse(raw),
            Err(InvalidAccountId::TooLong(MAX_ACCOUNT_ID_LEN + 1))
        );
        assert!(AccountId::parse("x".repeat(MAX_ACCOUNT_ID_LEN)).is_ok());
    }

    #[test]
    fn test_account_id_rejects_control_chars() {
        assert_eq!(
            AccountId::parse("acc\n01"),
            Err(InvalidAccountId::ControlCharacter)
        );
    }

    #[test]
    fn test_account_id_serde_validates() {
        let parsed: Result<AccountId, _> = serde_json::from_str("\"  \"");
        assert!(parsed.is_err());

        let id: AccountId = serde_json::from_str("\"ACC-9\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ACC-9\"");
    }

    #[test]
    fn test_account_type_roundtrip() {
        for at in [AccountType::Savings, AccountType::Current] {
            assert_eq!(AccountType::from_str(at.as_str()), Some(at));
        }
        assert_eq!(AccountType::from_str("SAVINGS"), Some(AccountType::Savings));
        assert_eq!(AccountType::from_str("loan"), None);
    }

    #[test]
    fn test_open_account_starts_empty() {
        let account = Account::open(AccountId::parse("ACC-1").unwrap(), "Ada");
        assert_eq!(account.balance, 0);
        assert_eq!(account.account_type, AccountType::Savings);
        assert_eq!(account.holder_name, "Ada");
    }
}
