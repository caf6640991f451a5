//! Connection opening and per-connection runtime tunables.

use dbrelay_types::ConnectionData;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};

use crate::error::DbError;

/// Oldest bundled SQLite that supports every statement the session emits
/// (`RETURNING` arrived in 3.35.0).
pub const MIN_SQLITE_VERSION: i32 = 3_035_000;

/// Runtime tunables applied to every connection a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

/// Returns `true` when the linked SQLite library can serve sessions.
pub fn driver_available() -> bool {
    rusqlite::version_number() >= MIN_SQLITE_VERSION
}

/// Opens a native connection for `data` with WAL mode, foreign keys, the
/// configured busy timeout, and a `current_user()` SQL function that
/// reports the transliterated username.
pub(crate) fn open_connection(
    data: &ConnectionData,
    settings: DbRuntimeSettings,
) -> Result<Connection, DbError> {
    if !driver_available() {
        return Err(DbError::Connection(format!(
            "SQLite {} is too old, {} or newer is required",
            rusqlite::version(),
            MIN_SQLITE_VERSION
        )));
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let conn = Connection::open_with_flags(data.database_path(), flags)
        .map_err(|e| DbError::Connection(e.to_string()))?;

    init_connection(&conn, data, settings).map_err(|e| DbError::Connection(e.to_string()))?;

    Ok(conn)
}

fn init_connection(
    conn: &Connection,
    data: &ConnectionData,
    settings: DbRuntimeSettings,
) -> rusqlite::Result<()> {
    // In-memory databases report "memory", which is expected.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {}",
                journal_mode
            )),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};",
        settings.busy_timeout_ms
    ))?;

    let user = data.backend_user();
    conn.create_scalar_function(
        "current_user",
        0,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |_ctx| Ok(user.clone()),
    )
}
