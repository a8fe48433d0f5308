use crate::core::{Result, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-owner critical sections.
///
/// Every mutating operation on an owner's liveness record, trustees or
/// beneficiaries runs while holding that owner's guard. Different owners
/// never contend.
#[derive(Default)]
pub struct OwnerLocks {
    slots: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one owner-scoped operation.
pub struct OwnerGuard {
    owner: UserId,
    _guard: OwnedMutexGuard<()>,
}

impl OwnerGuard {
    pub fn owner(&self) -> &UserId {
        &self.owner
    }
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, owner: &UserId) -> Result<OwnerGuard> {
        let slot = {
            let mut slots = self.slots.lock()?;
            Arc::clone(slots.entry(owner.clone()).or_default())
        };
        Ok(OwnerGuard {
            owner: owner.clone(),
            _guard: slot.lock_owned().await,
        })
    }

    /// Drops slots nobody holds or waits on. Returns how many were dropped.
    pub fn prune_idle(&self) -> Result<usize> {
        let mut slots = self.slots.lock()?;
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        Ok(before - slots.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.slots.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.slots.lock()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VigilError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_owner_is_serialized() {
        let locks = Arc::new(OwnerLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let owner = UserId::from("o");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let owner = owner.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&owner).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_owners_do_not_block() {
        let locks = OwnerLocks::new();
        let a = locks.lock(&UserId::from("a")).await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&UserId::from("b")))
            .await
            .expect("second owner must not wait")
            .unwrap();
        assert_eq!(a.owner().as_str(), "a");
        assert_eq!(b.owner().as_str(), "b");
    }

    #[tokio::test]
    async fn prune_keeps_held_slots() {
        let locks = OwnerLocks::new();
        let held = locks.lock(&UserId::from("held")).await.unwrap();
        drop(locks.lock(&UserId::from("idle")).await.unwrap());

        assert_eq!(locks.prune_idle().unwrap(), 1);
        assert_eq!(locks.len().unwrap(), 1);
        drop(held);
        assert_eq!(locks.prune_idle().unwrap(), 1);
        assert!(locks.is_empty().unwrap());
    }

    #[tokio::test]
    async fn poisoned_table_is_reported() {
        let locks = Arc::new(OwnerLocks::new());
        drop(locks.lock(&UserId::from("o")).await.unwrap());

        let poisoner = Arc::clone(&locks);
        let _ = std::thread::spawn(move || {
            let _slots = poisoner.slots.lock().unwrap();
            panic!("poison the slot table");
        })
        .join();

        assert!(matches!(locks.len(), Err(VigilError::LockError(_))));
        assert!(locks.is_empty().is_err());
        assert!(locks.lock(&UserId::from("o")).await.is_err());
    }
}
