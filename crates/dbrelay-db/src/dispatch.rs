//! Runs session operations on the blocking thread pool.
//!
//! Each dispatched operation gets its own connection id and its own
//! [`Session`], opened with the template session's connection data. The id
//! is registered before the worker starts, so the caller can cancel the
//! operation as soon as `dispatch` returns.

use std::sync::Arc;

use dbrelay_types::ConnectionData;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancel;
use crate::error::{DbError, DispatchError};
use crate::registry::Registry;
use crate::session::Session;
use crate::tracker::PendingOperations;

/// Removes a reserved id when the worker is done with it, including when the
/// worker never runs.
struct Reservation {
    registry: Arc<Registry>,
    id: Uuid,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Spawns operations, each on a fresh session cloned from a template.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs `op` on a new session opened with `template`'s connection data.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch<T, F>(&self, template: &Session, op: F) -> Dispatched<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, DbError> + Send + 'static,
    {
        self.dispatch_configured(template, |_| {}, op)
    }

    /// Like [`Dispatcher::dispatch`], letting `configure` adjust the copied
    /// connection data before the worker opens it.
    pub fn dispatch_configured<T, C, F>(
        &self,
        template: &Session,
        configure: C,
        op: F,
    ) -> Dispatched<T>
    where
        T: Send + 'static,
        C: FnOnce(&mut ConnectionData),
        F: FnOnce(&mut Session) -> Result<T, DbError> + Send + 'static,
    {
        let id = Uuid::new_v4();
        self.registry.reserve(id);
        let reservation = Reservation {
            registry: Arc::clone(&self.registry),
            id,
        };

        let data = template.connection_data().map(|mut data| {
            configure(&mut data);
            data
        });
        let settings = template.settings();
        let registry = Arc::clone(&self.registry);
        let token = CancellationToken::new();
        let worker_token = token.clone();

        tracing::info!(operation_id = %id, template_id = %template.id(), "operation dispatched");

        let handle = tokio::task::spawn_blocking(move || {
            let _reservation = reservation;
            let mut session = Session::for_id(registry, id, settings);
            session.on_cancelled(move |_| worker_token.cancel());

            let data = data.ok_or_else(|| {
                DbError::Connection("template session was never opened".to_string())
            })?;
            session.open(&data)?;
            tracing::debug!(operation_id = %id, "operation started");

            let result = op(&mut session);
            session.close();

            match &result {
                Ok(_) => tracing::debug!(operation_id = %id, "operation completed"),
                Err(e) if e.is_cancelled() => {
                    tracing::info!(operation_id = %id, "operation cancelled")
                }
                Err(e) => tracing::warn!(operation_id = %id, error = %e, "operation failed"),
            }
            result
        });

        Dispatched {
            id,
            token,
            registry: Arc::clone(&self.registry),
            handle,
        }
    }

    /// Dispatches `op` and hands its outcome to `on_complete` once it
    /// finishes. Returns the operation id.
    pub fn dispatch_then<T, F, G>(&self, template: &Session, op: F, on_complete: G) -> Uuid
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, DbError> + Send + 'static,
        G: FnOnce(Result<T, DispatchError>) + Send + 'static,
    {
        let dispatched = self.dispatch(template, op);
        let id = dispatched.id();
        tokio::spawn(async move {
            on_complete(dispatched.join().await);
        });
        id
    }

    /// Dispatches `op` as tracked work: the id is added to `pending` before
    /// this returns and reaped once `on_complete` has seen the outcome, so
    /// [`PendingOperations::drained`] needs no manual reap.
    pub fn dispatch_tracked<T, F, G>(
        &self,
        template: &Session,
        pending: &Arc<PendingOperations>,
        op: F,
        on_complete: G,
    ) -> Uuid
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, DbError> + Send + 'static,
        G: FnOnce(Result<T, DispatchError>) + Send + 'static,
    {
        let dispatched = self.dispatch(template, op);
        let id = dispatched.id();
        pending.track(&dispatched);
        tracing::debug!(operation_id = %id, pending = pending.count(), "operation tracked");

        let pending = Arc::clone(pending);
        tokio::spawn(async move {
            on_complete(dispatched.join().await);
            pending.reap();
        });
        id
    }
}

/// Handle to a dispatched operation.
#[derive(Debug)]
pub struct Dispatched<T> {
    id: Uuid,
    token: CancellationToken,
    registry: Arc<Registry>,
    handle: JoinHandle<Result<T, DbError>>,
}

impl<T> Dispatched<T> {
    /// Connection id of the operation; the target for cancels.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token fired when the worker observes a cancel.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Requests cancellation. See [`cancel_operation`](crate::cancel_operation).
    pub fn cancel(&self) -> Result<bool, DbError> {
        cancel::cancel_operation(&self.registry, self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the operation and returns its result.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Failed`] wraps the worker's error with its message
    /// intact; [`DispatchError::Aborted`] reports a worker that panicked.
    pub async fn join(self) -> Result<T, DispatchError> {
        let id = self.id;
        match self.handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(DispatchError::Failed { id, source }),
            Err(e) => {
                tracing::error!(operation_id = %id, error = %e, "dispatched operation aborted");
                Err(DispatchError::Aborted {
                    id,
                    reason: e.to_string(),
                })
            }
        }
    }
}
