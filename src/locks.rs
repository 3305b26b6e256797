use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::UserId;

type Slots = Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>;

/// Registry of one async mutex per account owner.
///
/// Slots are created on first use and dropped again once no task holds or
/// waits for them, so the registry only grows with the number of owners
/// being served concurrently.
#[derive(Debug, Default, Clone)]
pub struct OwnerLocks {
    slots: Slots,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other task holds the lock for `owner`.
    pub async fn acquire(&self, owner: &UserId) -> OwnerGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(owner.clone()).or_default())
        };

        let guard = slot.lock_owned().await;

        OwnerGuard {
            guard: Some(guard),
            owner: owner.clone(),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of owners currently locked or waited on.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one owner's account until dropped.
#[derive(Debug)]
pub struct OwnerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    owner: UserId,
    slots: Slots,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees the registry and waiters.
        drop(self.guard.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.owner)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_owner_is_serialized() {
        let locks = OwnerLocks::new();
        let alice = UserId::new("alice");

        let first = locks.acquire(&alice).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&alice)).await;
        assert!(second.is_err(), "second acquire must wait");

        drop(first);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&alice)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_owners_do_not_block() {
        let locks = OwnerLocks::new();
        let _alice = locks.acquire(&UserId::new("alice")).await;
        let bob = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&UserId::new("bob")),
        )
        .await;
        assert!(bob.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn released_slots_are_removed() {
        let locks = OwnerLocks::new();
        {
            let _guard = locks.acquire(&UserId::new("alice")).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
