// Lock manager - serializes every operation on a resource, in arrival order

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;

struct Slot {
    lock: Arc<Mutex<()>>,
    /// Operations holding or waiting for `lock`.
    pending: usize,
}

/// Registry of per-key slots. Keys with nothing pending are dropped.
///
/// Each slot is a fair [`tokio::sync::Mutex`], so waiters are admitted in the
/// order they first asked for it.
#[derive(Default)]
pub struct LockManager {
    slots: StdMutex<HashMap<String, Slot>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` once every earlier operation under `key` has settled.
    ///
    /// The slot is released when the operation finishes, whether it returned
    /// an error, panicked, or was dropped by its caller. Errors go to this
    /// caller only.
    pub async fn with_exclusive<F, Fut, T>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.enter(key);
        let _guard = ticket.lock.clone().lock_owned().await;
        operation().await
    }

    /// Number of operations currently holding or waiting for `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.registry().get(key).map_or(0, |slot| slot.pending)
    }

    fn enter(&self, key: &str) -> Ticket<'_> {
        let mut slots = self.registry();
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::new(Mutex::new(())),
            pending: 0,
        });
        slot.pending += 1;
        if slot.pending > 1 {
            log::debug!("Queued on '{key}' behind {} operation(s)", slot.pending - 1);
        }
        Ticket {
            manager: self,
            key: key.to_string(),
            lock: slot.lock.clone(),
        }
    }

    fn leave(&self, key: &str) {
        let mut slots = self.registry();
        if let Some(slot) = slots.get_mut(key) {
            slot.pending = slot.pending.saturating_sub(1);
            if slot.pending == 0 {
                slots.remove(key);
            }
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // The map is never left half-updated, so a poisoned guard is still usable
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("keys", &self.registry().len())
            .finish()
    }
}

/// Membership in a key's queue; leaving happens on drop.
struct Ticket<'a> {
    manager: &'a LockManager,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.manager.leave(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_for_pending(manager: &LockManager, key: &str, n: usize) {
        while manager.pending(key) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_same_key_never_overlaps() {
        let manager = Arc::new(LockManager::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .with_exclusive("leads", || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pending("leads"), 0);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_exclusive("users", || async {
                        release_rx.await.ok();
                    })
                    .await;
            })
        };
        wait_for_pending(&manager, "users", 1).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let task_manager = manager.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                task_manager
                    .with_exclusive("users", || async {
                        order.lock().unwrap().push(i);
                    })
                    .await;
            }));
            wait_for_pending(&manager, "users", i + 2).await;
        }

        release_tx.send(()).unwrap();
        first.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_does_not_poison_key() {
        let manager = LockManager::new();

        let failed: Result<(), String> = manager
            .with_exclusive("partners", || async { Err("disk full".to_string()) })
            .await;
        assert_eq!(failed, Err("disk full".to_string()));

        let ok: Result<u32, String> = manager
            .with_exclusive("partners", || async { Ok(7) })
            .await;
        assert_eq!(ok, Ok(7));
        assert_eq!(manager.pending("partners"), 0);
    }

    #[tokio::test]
    async fn test_panic_releases_slot() {
        let manager = Arc::new(LockManager::new());

        let crashed = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_exclusive("logs", || async { panic!("handler bug") })
                    .await
            })
        };
        assert!(crashed.await.is_err());

        let value = manager.with_exclusive("logs", || async { 1 }).await;
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_dropped_operation_releases_slot() {
        let manager = Arc::new(LockManager::new());

        let stuck = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_exclusive("leads", || std::future::pending::<()>())
                    .await
            })
        };
        wait_for_pending(&manager, "leads", 1).await;

        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());
        assert_eq!(manager.pending("leads"), 0);

        let value = manager.with_exclusive("leads", || async { "next" }).await;
        assert_eq!(value, "next");
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let manager = Arc::new(LockManager::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .with_exclusive("leads", || async {
                        release_rx.await.ok();
                    })
                    .await;
            })
        };
        wait_for_pending(&manager, "leads", 1).await;

        let other = manager.with_exclusive("users", || async { 5 }).await;
        assert_eq!(other, 5);
        assert_eq!(manager.pending("leads"), 1);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_keys_are_pruned() {
        let manager = LockManager::new();
        for key in ["a", "b", "c"] {
            manager.with_exclusive(key, || async {}).await;
        }
        assert!(manager.registry().is_empty());
    }
}
