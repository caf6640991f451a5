//! Bookkeeping for dispatched operations that have not finished yet.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use uuid::Uuid;

use crate::cancel;
use crate::dispatch::Dispatched;
use crate::error::DbError;
use crate::registry::Registry;

/// Ids of operations still in flight.
///
/// An id stays tracked until [`PendingOperations::reap`] finds it gone from
/// the registry. [`Dispatcher::dispatch_tracked`](crate::Dispatcher::dispatch_tracked)
/// adds and reaps on its own; ids added by hand need a `reap` once their
/// operation finishes. [`PendingOperations::drained`] fires when a reap
/// leaves nothing tracked.
pub struct PendingOperations {
    registry: Arc<Registry>,
    ids: Mutex<Vec<Uuid>>,
    remaining: watch::Sender<usize>,
}

impl PendingOperations {
    pub fn new(registry: Arc<Registry>) -> Self {
        let (remaining, _) = watch::channel(0);
        Self {
            registry,
            ids: Mutex::new(Vec::new()),
            remaining,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Uuid>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks `id`. Adding an id twice tracks it once.
    pub fn add(&self, id: Uuid) {
        let mut ids = self.lock();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.remaining.send_replace(ids.len());
    }

    /// Tracks a dispatched operation.
    pub fn track<T>(&self, dispatched: &Dispatched<T>) {
        self.add(dispatched.id());
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    /// Requests cancellation of every tracked operation. Returns how many
    /// were still registered.
    ///
    /// # Errors
    ///
    /// Every id is attempted; the first delivery failure is returned.
    pub fn cancel_all(&self) -> Result<usize, DbError> {
        let ids = self.lock().clone();
        let mut cancelled = 0;
        let mut first_error = None;

        for id in ids {
            match cancel::cancel_operation(&self.registry, id) {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        operation_id = %id,
                        error = %e,
                        "failed to cancel pending operation"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(cancelled, "cancel requested for pending operations");
        match first_error {
            Some(e) => Err(e),
            None => Ok(cancelled),
        }
    }

    /// Drops ids that are no longer registered. Returns how many remain.
    pub fn reap(&self) -> usize {
        let mut ids = self.lock();
        let before = ids.len();
        ids.retain(|id| self.registry.exists(*id));
        let remaining = ids.len();
        drop(ids);

        self.remaining.send_replace(remaining);
        if before > 0 && remaining == 0 {
            tracing::info!("all pending operations finished");
        }
        remaining
    }

    /// Resolves once a [`PendingOperations::reap`] has left nothing tracked,
    /// or immediately if nothing is tracked.
    pub async fn drained(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|remaining| *remaining == 0).await;
    }
}

impl std::fmt::Debug for PendingOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperations")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_drops_finished_ids() {
        let registry = Arc::new(Registry::new());
        let tracker = PendingOperations::new(Arc::clone(&registry));

        let live = Uuid::new_v4();
        let finished = Uuid::new_v4();
        registry.reserve(live);
        tracker.add(live);
        tracker.add(live);
        tracker.add(finished);
        assert_eq!(tracker.count(), 2);

        assert_eq!(tracker.reap(), 1);
        assert!(tracker.contains(live));
        assert!(!tracker.contains(finished));
    }

    #[test]
    fn cancel_all_counts_registered_ids() {
        let registry = Arc::new(Registry::new());
        let tracker = PendingOperations::new(Arc::clone(&registry));

        let live = Uuid::new_v4();
        registry.reserve(live);
        tracker.add(live);
        tracker.add(Uuid::new_v4());

        assert_eq!(tracker.cancel_all().expect("no handle to fail"), 1);
        assert!(registry.take_cancel(live));
    }

    #[tokio::test]
    async fn drained_resolves_after_last_reap() {
        let registry = Arc::new(Registry::new());
        let tracker = Arc::new(PendingOperations::new(Arc::clone(&registry)));
        tracker.drained().await;

        let id = Uuid::new_v4();
        registry.reserve(id);
        tracker.add(id);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.unregister(id);
        assert_eq!(tracker.reap(), 0);
        waiter.await.expect("waiter should finish");
    }
}
