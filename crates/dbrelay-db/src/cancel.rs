//! Out-of-band cancellation of a statement running on another thread.
//!
//! A cancel marks the target connection's flag in the [`Registry`] and then
//! asks the backend to abort whatever it is executing. The statement's own
//! `execute` call observes the flag and reports
//! [`DbError::OperationCancelled`]; the caller still has to wait for that
//! completion, nothing is torn down here.

use rusqlite::InterruptHandle;
use uuid::Uuid;

use crate::error::DbError;
use crate::registry::Registry;

/// Number of times a cancel request is sent before giving up.
pub const CANCEL_ATTEMPTS: u32 = 10;

/// Native side of a connection that can abort its running statement from
/// another thread.
pub trait CancelHandle: Send + Sync {
    /// Sends one cancel request. Errors carry the backend's text.
    fn send_cancel(&self) -> Result<(), String>;
}

impl CancelHandle for InterruptHandle {
    fn send_cancel(&self) -> Result<(), String> {
        self.interrupt();
        Ok(())
    }
}

/// Cancels the operation running on connection `id`.
///
/// Returns `Ok(false)` when `id` is not registered; nothing is changed in
/// that case. An entry without an open connection only has its flag raised,
/// which the session checks before its next statement.
///
/// # Errors
///
/// Returns [`DbError::Cancel`] if every one of [`CANCEL_ATTEMPTS`] requests
/// fails. The flag is lowered again so the session does not report a cancel
/// that never happened.
pub fn cancel_operation(registry: &Registry, id: Uuid) -> Result<bool, DbError> {
    // The flag goes up before the interrupt so a statement that fails from
    // the interrupt always finds it.
    if !registry.request_cancel(id) {
        tracing::debug!(connection_id = %id, "cancel requested for unknown connection");
        return Ok(false);
    }

    let Some(handle) = registry.cancel_handle(id) else {
        tracing::debug!(connection_id = %id, "connection not open, cancel flag raised");
        return Ok(true);
    };

    match send_with_retry(handle.as_ref(), CANCEL_ATTEMPTS) {
        Ok(attempts) => {
            tracing::info!(connection_id = %id, attempts, "cancel request delivered");
            Ok(true)
        }
        Err(message) => {
            registry.clear_cancel(id);
            tracing::warn!(connection_id = %id, error = %message, "cancel request failed");
            Err(DbError::Cancel(message))
        }
    }
}

fn send_with_retry(handle: &dyn CancelHandle, attempts: u32) -> Result<u32, String> {
    let mut last_error = String::from("cancel was not attempted");
    for attempt in 1..=attempts {
        match handle.send_cancel() {
            Ok(()) => return Ok(attempt),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}
