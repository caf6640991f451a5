//! Error taxonomy for sessions and dispatched operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`Session`](crate::Session) and the cancellation
/// protocol.
#[derive(Debug, Error)]
pub enum DbError {
    /// The driver is unavailable, the connection could not be opened, or an
    /// operation needed an open connection and there was none.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed for a reason other than cancellation.
    #[error("query error: {0}")]
    Query(String),

    /// A statement failed, or was refused, because a cancel was requested for
    /// the connection it ran on.
    #[error("operation on connection {id} was cancelled")]
    OperationCancelled {
        /// Connection the cancelled statement belonged to.
        id: Uuid,
    },

    /// Begin, commit, or rollback was refused by the backend.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The cancel request itself could not be delivered.
    #[error("cancel error: {0}")]
    Cancel(String),

    /// A record or table name cannot be turned into a statement.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl DbError {
    /// Returns `true` for [`DbError::OperationCancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::OperationCancelled { .. })
    }
}

/// Failure of an operation run through the [`Dispatcher`](crate::Dispatcher).
///
/// The wrapped message is preserved; the outer error attributes it to the
/// dispatched operation rather than to the caller's own session.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The operation, or the cloned session it ran on, returned an error.
    #[error("dispatched operation {id} failed: {source}")]
    Failed {
        /// Identifier returned by the dispatcher.
        id: Uuid,
        /// Error raised on the worker.
        #[source]
        source: DbError,
    },

    /// The worker did not return a result (it panicked or was aborted).
    #[error("dispatched operation {id} did not complete: {reason}")]
    Aborted {
        /// Identifier returned by the dispatcher.
        id: Uuid,
        /// Description of the join failure.
        reason: String,
    },
}

impl DispatchError {
    /// Identifier of the dispatched operation.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Failed { id, .. } | Self::Aborted { id, .. } => *id,
        }
    }

    /// The session error raised on the worker, if there was one.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Aborted { .. } => None,
        }
    }

    /// Returns `true` when the operation ended because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.db_error().is_some_and(DbError::is_cancelled)
    }
}
