//! SQL access layer for the dbrelay workspace.
//!
//! Wraps SQLite (via `rusqlite`) in a [`Session`] that exposes
//! record-oriented statement helpers, caller-controlled transactions,
//! catalog queries, and out-of-band cancellation of a running statement.
//! Long operations can be handed to the [`Dispatcher`], which runs each one
//! on its own session on the blocking thread pool, and followed with
//! [`PendingOperations`].
//!
//! # Design decisions
//!
//! - **Injected registry**: every session registers its connection id in a
//!   shared [`Registry`] passed in by the caller, which is what a cancel
//!   looks up. Tests build their own registry and never share state.
//! - **Cooperative cancellation**: a cancel raises a flag and interrupts the
//!   backend; the target's own `execute` call reports
//!   [`DbError::OperationCancelled`]. Nothing is torn down from outside.
//! - **Internal transactions yield to explicit ones**: helpers wrap each
//!   write in their own transaction unless the caller has begun one.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dbrelay_db::{Dispatcher, Record, Registry, Session};
//! use dbrelay_types::ConnectionData;
//!
//! let registry = Arc::new(Registry::new());
//! let mut session = Session::new(Arc::clone(&registry));
//! session.open(&ConnectionData::new("app.db").with_credentials("Иванов", ""))?;
//!
//! let record = Record::new().with_value("name", "x".to_string());
//! let row = session.insert_returning(&record, "items")?;
//!
//! let dispatcher = Dispatcher::new(registry);
//! let job = dispatcher.dispatch(&session, |s| s.execute("SELECT count(*) FROM items"));
//! job.cancel()?;
//! let outcome = job.join().await;
//! ```

mod cancel;
mod dispatch;
mod error;
mod record;
mod registry;
mod result;
mod schema;
mod session;
mod settings;
mod statement;
mod tracker;

pub use cancel::{cancel_operation, CancelHandle, CANCEL_ATTEMPTS};
pub use dispatch::{Dispatched, Dispatcher};
pub use error::{DbError, DispatchError};
pub use record::{Field, Record};
pub use registry::Registry;
pub use result::{value_to_text, ResultSet, Row};
pub use schema::RelationLookup;
pub use session::{Ownership, Session};
pub use settings::{driver_available, DbRuntimeSettings, MIN_SQLITE_VERSION};
pub use statement::{is_identifier, is_qualified_identifier, SqlStatement};
pub use tracker::PendingOperations;

pub use rusqlite::types::Value;
