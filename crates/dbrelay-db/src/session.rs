//! One authenticated connection plus its statement and transaction API.
//!
//! A [`Session`] is either **owning** (it registers a connection id and its
//! shared connection cell closes the native connection once the last sharer
//! is gone) or **borrowing** (created with [`Session::borrow_local`], it
//! shares the id and native connection of its origin and never closes it).
//!
//! Statement helpers run inside an *internal* transaction unless the caller
//! opened an explicit one with [`Session::begin_transaction`]; in that case
//! the helpers piggyback on the caller's transaction and never commit or
//! roll back on their own. Suppression is tracked per `Session` value: a
//! borrowing session does not see its origin's explicit transaction.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dbrelay_types::ConnectionData;
use rusqlite::types::{ToSql, Value};
use rusqlite::Connection;
use uuid::Uuid;

use crate::cancel::{self, CancelHandle};
use crate::error::DbError;
use crate::record::Record;
use crate::registry::Registry;
use crate::result::{value_to_text, ResultSet, Row};
use crate::settings::{self, DbRuntimeSettings};
use crate::statement::{self, SqlStatement};

/// Whether a session owns its native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Registered the connection id; the connection lives until this
    /// session and every session borrowed from it are dropped.
    Owning,
    /// Shares the connection of another session and never closes it.
    Borrowing,
}

type CancelListener = Box<dyn Fn(Uuid) + Send>;

/// Result of running one statement, before it is turned into an error.
enum StatementOutcome<T> {
    Done(T),
    Cancelled,
    Failed(String),
}

#[derive(Default)]
struct ConnectionState {
    conn: Option<Connection>,
    applied: Option<ConnectionData>,
}

/// Native connection shared by an owning session and its borrowers.
struct SharedConnection {
    id: Uuid,
    registry: Arc<Registry>,
    state: Mutex<ConnectionState>,
    aliases: AtomicUsize,
}

impl SharedConnection {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(conn) = state.conn.take() {
            close_native(self.id, conn);
        }
        self.registry.unregister(self.id);
        tracing::debug!(connection_id = %self.id, "connection unregistered");
    }
}

fn close_native(id: Uuid, conn: Connection) {
    if let Err((_, e)) = conn.close() {
        tracing::warn!(connection_id = %id, error = %e, "error while closing connection");
    }
}

fn not_open() -> DbError {
    DbError::Connection("connection is not open".to_string())
}

/// A connection to the backend and the operations issued on it.
///
/// A session is `Send` but is used by one caller at a time; every method
/// that touches the connection takes `&mut self`. To run work concurrently,
/// hand it to the [`Dispatcher`](crate::Dispatcher), which clones a fresh
/// session per operation.
pub struct Session {
    id: Uuid,
    registry: Arc<Registry>,
    shared: Arc<SharedConnection>,
    ownership: Ownership,
    settings: DbRuntimeSettings,
    explicit_transaction: bool,
    /// Set while a transaction begun by this value's `begin_internal` is open.
    internal_transaction: bool,
    cancel_listeners: Vec<CancelListener>,
}

impl Session {
    /// Creates an owning session under a fresh id with default settings.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_settings(registry, DbRuntimeSettings::default())
    }

    /// Creates an owning session under a fresh id.
    pub fn with_settings(registry: Arc<Registry>, settings: DbRuntimeSettings) -> Self {
        Self::for_id(registry, Uuid::new_v4(), settings)
    }

    /// Creates an owning session registered under `id`.
    ///
    /// The dispatcher allocates `id` before the worker starts so that a
    /// cancel can target the operation before this session exists; a flag
    /// raised in that window is kept.
    pub fn for_id(registry: Arc<Registry>, id: Uuid, settings: DbRuntimeSettings) -> Self {
        registry.register(id, None);
        tracing::debug!(connection_id = %id, "connection registered");

        let shared = Arc::new(SharedConnection {
            id,
            registry: Arc::clone(&registry),
            state: Mutex::new(ConnectionState::default()),
            aliases: AtomicUsize::new(0),
        });

        Self {
            id,
            registry,
            shared,
            ownership: Ownership::Owning,
            settings,
            explicit_transaction: false,
            internal_transaction: false,
            cancel_listeners: Vec::new(),
        }
    }

    /// Creates a borrowing session on the same connection.
    pub fn borrow_local(&self) -> Session {
        self.shared.aliases.fetch_add(1, Ordering::SeqCst);
        Self {
            id: self.id,
            registry: Arc::clone(&self.registry),
            shared: Arc::clone(&self.shared),
            ownership: Ownership::Borrowing,
            settings: self.settings,
            explicit_transaction: false,
            internal_transaction: false,
            cancel_listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Number of live borrowing sessions on this connection.
    pub fn alias_count(&self) -> usize {
        self.shared.aliases.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The connection data most recently applied by [`Session::open`].
    pub fn connection_data(&self) -> Option<ConnectionData> {
        self.shared.lock().applied.clone()
    }

    /// Username as configured, before transliteration.
    pub fn user_name(&self) -> Option<String> {
        let state = self.shared.lock();
        state.applied.as_ref().map(|d| d.user_name.clone())
    }

    /// Applies `data` and opens the connection.
    ///
    /// Does nothing when the connection is open and `data` equals the data
    /// already applied. Otherwise any open connection is closed and a new
    /// one is opened for `data`; an explicit transaction on the old
    /// connection is lost.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] when the driver is unavailable or the open
    /// fails, carrying the backend's text. A borrowing session cannot
    /// reopen the shared connection with different data.
    pub fn open(&mut self, data: &ConnectionData) -> Result<(), DbError> {
        let mut state = self.shared.lock();
        if state.conn.is_some() && state.applied.as_ref() == Some(data) {
            tracing::debug!(connection_id = %self.id, "connection parameters unchanged");
            return Ok(());
        }

        if self.ownership == Ownership::Borrowing {
            return Err(DbError::Connection(
                "a borrowed session cannot reopen the shared connection".to_string(),
            ));
        }

        if let Some(old) = state.conn.take() {
            self.registry.detach(self.id);
            close_native(self.id, old);
            self.explicit_transaction = false;
            self.internal_transaction = false;
            tracing::info!(connection_id = %self.id, "connection data changed, reopening");
        }

        state.applied = Some(data.clone());
        let conn = settings::open_connection(data, self.settings)?;

        let handle: Arc<dyn CancelHandle> = Arc::new(conn.get_interrupt_handle());
        if !self.registry.attach(self.id, Arc::clone(&handle)) {
            self.registry.register(self.id, Some(handle));
        }
        state.conn = Some(conn);

        tracing::info!(
            connection_id = %self.id,
            database = %data.database_path().display(),
            user = %data.backend_user(),
            "connection opened"
        );
        Ok(())
    }

    /// Closes the connection. Idempotent; does nothing on a borrowing session.
    pub fn close(&mut self) {
        if self.ownership == Ownership::Borrowing {
            tracing::debug!(connection_id = %self.id, "borrowed session keeps the connection");
            return;
        }

        let mut state = self.shared.lock();
        if let Some(conn) = state.conn.take() {
            self.registry.detach(self.id);
            close_native(self.id, conn);
            tracing::info!(connection_id = %self.id, "connection closed");
        }
        self.explicit_transaction = false;
        self.internal_transaction = false;
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().conn.is_some()
    }

    /// Fails with [`DbError::Connection`] unless the connection is open.
    pub fn check_connection(&self) -> Result<(), DbError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(not_open())
        }
    }

    /// Returns `true` while the caller holds an explicit transaction.
    pub fn in_explicit_transaction(&self) -> bool {
        self.explicit_transaction
    }

    /// Returns `true` while the backend connection is inside any
    /// transaction, explicit or internal.
    pub fn in_backend_transaction(&self) -> bool {
        self.shared
            .lock()
            .conn
            .as_ref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Begins a caller-owned transaction. Statement helpers will not begin,
    /// commit, or roll back until it is ended or cancelled.
    pub fn begin_transaction(&mut self) -> Result<(), DbError> {
        self.check_connection()?;
        self.transaction_command("BEGIN")?;
        self.explicit_transaction = true;
        Ok(())
    }

    /// Commits the caller-owned transaction. A refused commit rolls the
    /// transaction back before the error is returned.
    pub fn end_transaction(&mut self) -> Result<(), DbError> {
        self.check_connection()?;
        self.explicit_transaction = false;
        self.commit()
    }

    /// Rolls back the caller-owned transaction.
    pub fn cancel_transaction(&mut self) -> Result<(), DbError> {
        self.check_connection()?;
        self.explicit_transaction = false;
        self.transaction_command("ROLLBACK")
    }

    /// Begins an internal transaction unless an explicit one is active.
    pub fn begin_internal(&mut self) -> Result<(), DbError> {
        if self.explicit_transaction {
            return Ok(());
        }
        self.transaction_command("BEGIN")?;
        self.internal_transaction = true;
        Ok(())
    }

    /// Commits the internal transaction unless an explicit one is active.
    pub fn end_internal(&mut self) -> Result<(), DbError> {
        if self.explicit_transaction {
            return Ok(());
        }
        self.internal_transaction = false;
        self.commit()
    }

    /// Rolls back the internal transaction unless an explicit one is active.
    pub fn cancel_internal(&mut self) -> Result<(), DbError> {
        if self.explicit_transaction {
            return Ok(());
        }
        self.internal_transaction = false;
        self.transaction_command("ROLLBACK")
    }

    fn transaction_command(&self, command: &str) -> Result<(), DbError> {
        let state = self.shared.lock();
        let conn = state.conn.as_ref().ok_or_else(not_open)?;
        conn.execute_batch(command)
            .map_err(|e| DbError::Transaction(format!("{command} failed: {e}")))?;
        tracing::debug!(connection_id = %self.id, command, "transaction command");
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        let result = self.transaction_command("COMMIT");
        if result.is_err() {
            self.rollback_open_transaction();
        }
        result
    }

    /// Runs `f` between [`Session::begin_internal`] and
    /// [`Session::end_internal`], rolling back if anything fails.
    fn in_internal_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.begin_internal()?;
        let result = f(self).and_then(|value| self.end_internal().map(|()| value));
        if result.is_err() {
            self.rollback_after_failure();
        }
        result
    }

    /// Rolls back after a failed statement, but only a transaction this
    /// session began internally. A transaction begun through another
    /// session on the shared connection is left to its owner.
    fn rollback_after_failure(&mut self) {
        if !self.internal_transaction {
            return;
        }
        self.internal_transaction = false;
        self.rollback_open_transaction();
    }

    fn rollback_open_transaction(&self) {
        let state = self.shared.lock();
        let Some(conn) = state.conn.as_ref() else {
            return;
        };
        if conn.is_autocommit() {
            return;
        }
        match conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(connection_id = %self.id, "rolled back after failure"),
            Err(e) => tracing::warn!(
                connection_id = %self.id,
                error = %e,
                "rollback after failure failed"
            ),
        }
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Runs one statement and returns every row it produces.
    ///
    /// A cancel requested for this connection is honoured before the
    /// statement starts and when the statement fails; either way the result
    /// is [`DbError::OperationCancelled`] and the "cancelled" listeners are
    /// notified. Any other failure rolls back an internal transaction and
    /// returns [`DbError::Query`] with the backend's message.
    pub fn execute(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        self.execute_with(sql, &[])
    }

    /// [`Session::execute`] with named parameters (`(":name", &value)`).
    pub fn execute_with(
        &mut self,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
    ) -> Result<ResultSet, DbError> {
        let outcome = self.run_statement(sql, |conn| collect_rows(conn, sql, params))?;
        self.finish(sql, outcome)
    }

    fn query_statement(&mut self, stmt: &SqlStatement) -> Result<ResultSet, DbError> {
        let params = stmt.named_params();
        self.execute_with(stmt.text(), &params)
    }

    fn change_statement(&mut self, stmt: &SqlStatement) -> Result<usize, DbError> {
        let params = stmt.named_params();
        let outcome = self.run_statement(stmt.text(), |conn| {
            conn.execute(stmt.text(), params.as_slice())
        })?;
        self.finish(stmt.text(), outcome)
    }

    fn run_statement<T>(
        &self,
        sql: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<StatementOutcome<T>, DbError> {
        let state = self.shared.lock();
        let conn = state.conn.as_ref().ok_or_else(not_open)?;

        if self.registry.take_cancel(self.id) {
            return Ok(StatementOutcome::Cancelled);
        }

        tracing::debug!(connection_id = %self.id, sql, "executing statement");
        Ok(match f(conn) {
            Ok(value) => StatementOutcome::Done(value),
            Err(_) if self.registry.take_cancel(self.id) => StatementOutcome::Cancelled,
            Err(e) => StatementOutcome::Failed(e.to_string()),
        })
    }

    fn finish<T>(&mut self, sql: &str, outcome: StatementOutcome<T>) -> Result<T, DbError> {
        match outcome {
            StatementOutcome::Done(value) => Ok(value),
            StatementOutcome::Cancelled => {
                tracing::warn!(connection_id = %self.id, sql, "query cancelled");
                self.notify_cancelled();
                self.rollback_after_failure();
                Err(DbError::OperationCancelled { id: self.id })
            }
            StatementOutcome::Failed(message) => {
                tracing::warn!(connection_id = %self.id, sql, error = %message, "query failed");
                self.rollback_after_failure();
                Err(DbError::Query(message))
            }
        }
    }

    /// First column of every row, rendered as text.
    pub fn simple_list(&mut self, sql: &str) -> Result<Vec<String>, DbError> {
        let rows = self.execute(sql)?;
        Ok(rows
            .iter()
            .map(|row| row.value(0).map(value_to_text).unwrap_or_default())
            .collect())
    }

    /// First column of the first row.
    pub fn scalar(&mut self, sql: &str) -> Result<Option<Value>, DbError> {
        let rows = self.execute(sql)?;
        Ok(rows.first().and_then(|row| row.value(0).cloned()))
    }

    /// Refreshes planner statistics for `table`, or for the whole database
    /// when `table` is empty.
    pub fn analyze(&mut self, table: &str) -> Result<(), DbError> {
        let sql = if table.is_empty() {
            "ANALYZE".to_string()
        } else {
            statement::check_table(table)?;
            format!("ANALYZE {table}")
        };
        self.check_connection()?;
        self.in_internal_transaction(|session| session.execute(&sql).map(|_| ()))
    }

    // ── Record statements ────────────────────────────────────────────

    /// Inserts `record` into `table`.
    pub fn insert(&mut self, record: &Record, table: &str) -> Result<(), DbError> {
        let stmt = statement::insert(record, table, false)?;
        self.check_connection()?;
        self.in_internal_transaction(|session| session.change_statement(&stmt))?;
        tracing::debug!(connection_id = %self.id, table, "row inserted");
        Ok(())
    }

    /// Inserts `record` into `table` and returns the stored row, including
    /// columns the backend filled in.
    pub fn insert_returning(
        &mut self,
        record: &Record,
        table: &str,
    ) -> Result<Option<Row>, DbError> {
        let stmt = statement::insert(record, table, true)?;
        self.check_connection()?;
        let rows = self.in_internal_transaction(|session| session.query_statement(&stmt))?;
        Ok(rows.into_rows().into_iter().next())
    }

    /// Updates the rows of `table` matching the key fields of `record` with
    /// its remaining fields. Returns the number of rows changed.
    pub fn update(&mut self, record: &Record, table: &str) -> Result<usize, DbError> {
        let stmt = statement::update(record, table)?;
        self.check_connection()?;
        let changed = self.in_internal_transaction(|session| session.change_statement(&stmt))?;
        tracing::debug!(connection_id = %self.id, table, changed, "rows updated");
        Ok(changed)
    }

    /// Deletes the rows of `table` matching the key fields of `record`.
    /// Returns the number of rows deleted.
    pub fn delete(&mut self, record: &Record, table: &str) -> Result<usize, DbError> {
        let stmt = statement::delete(record, table)?;
        self.check_connection()?;
        let deleted = self.in_internal_transaction(|session| session.change_statement(&stmt))?;
        tracing::debug!(connection_id = %self.id, table, deleted, "rows deleted");
        Ok(deleted)
    }

    // ── Cancellation ─────────────────────────────────────────────────

    /// Registers a listener called with this session's id whenever one of
    /// its statements ends because of a cancel.
    pub fn on_cancelled(&mut self, listener: impl Fn(Uuid) + Send + 'static) {
        self.cancel_listeners.push(Box::new(listener));
    }

    fn notify_cancelled(&self) {
        for listener in &self.cancel_listeners {
            listener(self.id);
        }
    }

    /// Cancels the operation running on connection `id`. See
    /// [`cancel_operation`](crate::cancel_operation).
    pub fn cancel_operation(&self, id: Uuid) -> Result<bool, DbError> {
        cancel::cancel_operation(&self.registry, id)
    }

    /// Returns `true` while connection `id` is registered.
    pub fn is_operation_active(&self, id: Uuid) -> bool {
        self.registry.exists(id)
    }

    /// Number of connections in the registry this session uses.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.ownership == Ownership::Borrowing {
            self.shared.aliases.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("ownership", &self.ownership)
            .field("open", &self.is_open())
            .field("explicit_transaction", &self.explicit_transaction)
            .finish()
    }
}

fn collect_rows(
    conn: &Connection,
    sql: &str,
    params: &[(&str, &dyn ToSql)],
) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut set = ResultSet::new(columns);

    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Value>(i)?);
        }
        set.push(values);
    }
    Ok(set)
}
