//! Shared types for the dbrelay workspace.
//!
//! This crate holds the value objects that cross crate boundaries: the
//! backend endpoint plus credentials ([`ConnectionData`]) and the username
//! transliteration used before credentials reach the backend.
//!
//! It has no database dependency so configuration loaders and collaborators
//! can build a [`ConnectionData`] without pulling in the driver.

pub mod translit;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Database name that opens a private, in-memory database.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Backend endpoint and credentials.
///
/// Two values compare equal only when every field matches; a session
/// re-applies its connection parameters only when the value it is handed
/// differs from the one it already applied.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionData {
    /// Database name. For SQLite this is the database file name, or
    /// [`IN_MEMORY_DB`].
    pub db_name: String,
    /// Login name, stored as entered. See [`ConnectionData::backend_user`].
    pub user_name: String,
    /// Password. Never printed by the `Debug` implementation.
    pub password: String,
    /// Endpoint host. For SQLite this is the directory holding the database
    /// file; empty means `db_name` is used as given.
    pub host: String,
    /// Endpoint port.
    pub port: u16,
}

impl ConnectionData {
    /// Creates connection data for the given database with every other
    /// field empty.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Default::default()
        }
    }

    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets username and password.
    pub fn with_credentials(
        mut self,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user_name = user_name.into();
        self.password = password.into();
        self
    }

    /// Returns `true` when the data selects a private in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.db_name == IN_MEMORY_DB
    }

    /// Resolves the database location from `host` and `db_name`.
    pub fn database_path(&self) -> PathBuf {
        if self.host.is_empty() || self.is_in_memory() {
            PathBuf::from(&self.db_name)
        } else {
            PathBuf::from(&self.host).join(&self.db_name)
        }
    }

    /// The username in the ASCII-safe form the backend receives.
    pub fn backend_user(&self) -> String {
        translit::to_latin(&self.user_name)
    }
}

impl fmt::Debug for ConnectionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionData")
            .field("db_name", &self.db_name)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
