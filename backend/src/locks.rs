//! In-process mutual exclusion per ledger entity.
//!
//! Two units touching the same product or account never interleave; units for
//! different entities proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ledger_shared::EntityRef;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry size above which idle entries are pruned on acquire
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed async mutex registry
#[derive(Clone, Default)]
pub struct EntityLocks {
    inner: Arc<Mutex<HashMap<EntityRef, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one entity's unit of work
#[derive(Debug)]
pub struct EntityGuard {
    pub entity: EntityRef,
    _guard: OwnedMutexGuard<()>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity`
    pub async fn acquire(&self, entity: EntityRef) -> EntityGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(entity).or_default().clone()
        };

        tracing::trace!(%entity, "waiting for entity lock");
        EntityGuard {
            entity,
            _guard: lock.lock_owned().await,
        }
    }

    /// Entities currently tracked by the registry
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entity_is_exclusive() {
        let locks = EntityLocks::new();
        let guard = locks.acquire(EntityRef::product(1)).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(EntityRef::product(1)).await.entity })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), EntityRef::product(1));
    }

    #[tokio::test]
    async fn test_different_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _product = locks.acquire(EntityRef::product(1)).await;

        let other = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(EntityRef::bank_account(1)),
        )
        .await;
        assert!(other.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
