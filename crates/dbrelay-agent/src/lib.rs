//! Library half of the `dbrelay` agent: configuration, tracing setup, and
//! the collaborators the binary drives through a [`dbrelay_db::Session`].

pub mod config;
pub mod paths;
pub mod probe;

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber described by `logging`.
///
/// An unparsable level filter falls back to `info`.
pub fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
