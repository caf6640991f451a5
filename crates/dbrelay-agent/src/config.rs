//! Agent configuration loading from file and environment variables.

use dbrelay_db::DbRuntimeSettings;
use dbrelay_types::ConnectionData;
use serde::Deserialize;
use thiserror::Error;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Probe loop settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection configuration.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database file name, or `:memory:`.
    #[serde(default = "default_db_name")]
    pub db_name: String,

    /// Directory holding the database file. Empty means `db_name` is used as
    /// given.
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    /// Login name; Cyrillic names are transliterated before use.
    #[serde(default)]
    pub user_name: String,

    #[serde(default)]
    pub password: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Probe loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Seconds between keep-alive probes. Zero disables the loop.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "dbrelay_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_name() -> String {
    "dbrelay.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_name: default_db_name(),
            host: String::new(),
            port: 0,
            user_name: String::new(),
            password: String::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Connection data for [`Session::open`](dbrelay_db::Session::open).
    pub fn connection_data(&self) -> ConnectionData {
        ConnectionData::new(self.db_name.clone())
            .with_host(self.host.clone())
            .with_port(self.port)
            .with_credentials(self.user_name.clone(), self.password.clone())
    }

    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("db_name", &self.db_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parses configuration text without applying environment overrides.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DBRELAY_DB_NAME` overrides `database.db_name`
/// - `DBRELAY_DB_HOST` overrides `database.host`
/// - `DBRELAY_DB_PORT` overrides `database.port`
/// - `DBRELAY_DB_USER` overrides `database.user_name`
/// - `DBRELAY_DB_PASSWORD` overrides `database.password`
/// - `DBRELAY_LOG_LEVEL` overrides `logging.level`
/// - `DBRELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(db_name) = var("DBRELAY_DB_NAME") {
        config.database.db_name = db_name;
    }
    if let Some(host) = var("DBRELAY_DB_HOST") {
        config.database.host = host;
    }
    if let Some(port) = var("DBRELAY_DB_PORT") {
        if let Ok(parsed) = port.parse() {
            config.database.port = parsed;
        }
    }
    if let Some(user) = var("DBRELAY_DB_USER") {
        config.database.user_name = user;
    }
    if let Some(password) = var("DBRELAY_DB_PASSWORD") {
        config.database.password = password;
    }
    if let Some(level) = var("DBRELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("DBRELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
