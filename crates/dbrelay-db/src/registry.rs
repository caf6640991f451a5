//! Lookup table from connection identifier to cancel handle.
//!
//! The registry is the only state shared between the thread that owns a
//! session and the threads that may want to cancel its work. Every method
//! takes the single internal lock for the duration of one map operation and
//! never performs I/O while holding it: the cancel protocol fetches the
//! handle here and calls it after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::cancel::CancelHandle;

/// One registered connection.
#[derive(Default)]
struct ConnectionRecord {
    /// Present while the connection is open.
    handle: Option<Arc<dyn CancelHandle>>,
    cancel_requested: bool,
}

/// Registry of live connections, shared through `Arc` by sessions, the
/// dispatcher, and pending-operation trackers.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<HashMap<Uuid, ConnectionRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ConnectionRecord>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `id`, replacing its handle. A cancel flag already raised for
    /// the id is kept, so a cancel sent against a reserved id still reaches
    /// the session that later registers under it.
    pub fn register(&self, id: Uuid, handle: Option<Arc<dyn CancelHandle>>) {
        self.lock().entry(id).or_default().handle = handle;
    }

    /// Creates an entry without a handle unless one already exists.
    pub fn reserve(&self, id: Uuid) {
        self.lock().entry(id).or_default();
    }

    /// Sets the handle of an existing entry. Returns `false` if `id` is not
    /// registered.
    pub fn attach(&self, id: Uuid, handle: Arc<dyn CancelHandle>) -> bool {
        match self.lock().get_mut(&id) {
            Some(record) => {
                record.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Drops the handle of an entry, keeping the entry itself.
    pub fn detach(&self, id: Uuid) {
        if let Some(record) = self.lock().get_mut(&id) {
            record.handle = None;
        }
    }

    /// Removes `id`.
    pub fn unregister(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    /// Returns `true` while `id` is registered.
    pub fn exists(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    /// Raises the cancel flag for `id`. Returns `false`, without changing
    /// anything, when `id` is unknown.
    pub fn request_cancel(&self, id: Uuid) -> bool {
        match self.lock().get_mut(&id) {
            Some(record) => {
                record.cancel_requested = true;
                true
            }
            None => false,
        }
    }

    /// Returns and clears the cancel flag for `id`.
    pub fn take_cancel(&self, id: Uuid) -> bool {
        self.lock()
            .get_mut(&id)
            .map(|record| std::mem::take(&mut record.cancel_requested))
            .unwrap_or(false)
    }

    /// Clears the cancel flag without reporting it.
    pub fn clear_cancel(&self, id: Uuid) {
        if let Some(record) = self.lock().get_mut(&id) {
            record.cancel_requested = false;
        }
    }

    /// Returns the handle registered for `id`, if the connection is open.
    pub fn cancel_handle(&self, id: Uuid) -> Option<Arc<dyn CancelHandle>> {
        self.lock().get(&id)?.handle.clone()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.len())
            .finish()
    }
}
