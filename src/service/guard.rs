use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per secret. Every mutation of a secret aggregate runs
/// while holding its guard, so writers in this process never race on the
/// revision check.
#[derive(Default)]
pub struct WriterGuards {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Exclusive access to one secret. The map entry goes away with the last
/// holder or waiter, so ids that never resolve to a secret leave nothing
/// behind.
pub struct WriterGuard<'a> {
    guards: &'a WriterGuards,
    id: Uuid,
    held: Option<OwnedMutexGuard<()>>,
}

impl WriterGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> WriterGuard<'_> {
        // clone the Arc out so the shard lock is released before awaiting
        let lock = self.locks.entry(id).or_default().clone();
        let held = lock.lock_owned().await;
        WriterGuard {
            guards: self,
            id,
            held: Some(held),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        // clones happen under the shard lock, so a count of one means the
        // map holds the only reference
        self.guards
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_secret_is_serialized() {
        let guards = Arc::new(WriterGuards::new());
        let id = Uuid::new_v4();
        let held = guards.acquire(id).await;

        let g = guards.clone();
        let waiter = tokio::spawn(async move {
            let _guard = g.acquire(id).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
        assert!(guards.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_secrets_do_not_block() {
        let guards = WriterGuards::new();
        let a = guards.acquire(Uuid::new_v4()).await;
        let b = guards.acquire(Uuid::new_v4()).await;
        assert_eq!(guards.len(), 2);
        drop(a);
        assert_eq!(guards.len(), 1);
        drop(b);
        assert!(guards.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_another_writer_waits() {
        let guards = Arc::new(WriterGuards::new());
        let id = Uuid::new_v4();
        let held = guards.acquire(id).await;

        let g = guards.clone();
        let waiter = tokio::spawn(async move {
            let _guard = g.acquire(id).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        // the waiter still references the mutex
        assert_eq!(guards.len(), 1);
        waiter.await.unwrap();
        assert!(guards.is_empty());
    }
}
