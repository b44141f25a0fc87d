use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

type Slot = Arc<AsyncMutex<()>>;

/// Per-account mutual exclusion.
///
/// Each account with an operation in flight owns one async mutex; accounts
/// never share one. The outer map is only held long enough to find or evict a
/// slot, never across an await.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<AccountId, Slot>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account_id`. Waiters are served in FIFO
    /// order. Access ends when the guard is dropped.
    pub async fn lock(&self, account_id: &AccountId) -> AccountGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(account_id.clone()).or_default())
        };

        // Built before awaiting so that a cancelled wait still evicts the slot.
        let mut guard = AccountGuard {
            locks: self,
            account_id: account_id.clone(),
            slot: Some(Arc::clone(&slot)),
            held: None,
        };
        guard.held = Some(slot.lock_owned().await);
        guard
    }

    /// Number of accounts that currently have a slot.
    #[cfg(test)]
    fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, account_id: &AccountId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or waits for it.
        if slots
            .get(account_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(account_id);
        }
    }
}

/// Exclusive access to one account.
pub struct AccountGuard<'a> {
    locks: &'a AccountLocks,
    account_id: AccountId,
    slot: Option<Slot>,
    held: Option<OwnedMutexGuard<()>>,
}

impl AccountGuard<'_> {
    #[cfg(test)]
    fn account_id(&self) -> &AccountId {
        &self.account_id
    }
}

impl Drop for AccountGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.slot.take();
        self.locks.release(&self.account_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn id(raw: &str) -> AccountId {
        AccountId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = AccountLocks::new();
        let account = id("ACC-1");

        let first = locks.lock(&account).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&account)).await;
        assert!(second.is_err(), "second lock must wait for the first");

        drop(first);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock(&account)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.lock(&id("ACC-A")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(&id("ACC-B"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn test_slots_are_evicted_when_idle() {
        let locks = AccountLocks::new();
        {
            let guard = locks.lock(&id("ACC-1")).await;
            assert_eq!(guard.account_id().as_str(), "ACC-1");
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_is_evicted() {
        let locks = AccountLocks::new();
        let account = id("ACC-1");

        let held = locks.lock(&account).await;
        let _ = tokio::time::timeout(Duration::from_millis(10), locks.lock(&account)).await;
        drop(held);

        assert_eq!(locks.active(), 0);
    }
}
