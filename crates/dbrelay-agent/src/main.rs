//! dbrelay agent binary.
//!
//! Opens the configured database, runs a startup probe on a dispatched
//! session, then keeps probing on an interval until SIGTERM/SIGINT, at which
//! point pending probes are cancelled and drained before the connection is
//! closed.

use std::sync::Arc;
use std::time::Duration;

use dbrelay_agent::config;
use dbrelay_agent::probe;
use dbrelay_db::{Dispatcher, PendingOperations, Registry, Session};

/// How long shutdown waits for cancelled probes to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("DBRELAY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("dbrelay.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the agent cannot start without valid config");

    dbrelay_agent::init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let registry = Arc::new(Registry::new());
    let mut session =
        Session::with_settings(Arc::clone(&registry), config.database.runtime_settings());
    session
        .open(&config.database.connection_data())
        .expect("failed to open database, check [database] in config");

    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let pending = Arc::new(PendingOperations::new(Arc::clone(&registry)));

    dispatch_probe(&dispatcher, &session, &pending, "startup");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let interval_secs = config.agent.probe_interval_secs;
    if interval_secs == 0 {
        tracing::info!("probe loop disabled");
        shutdown.await;
    } else {
        tracing::info!(interval_secs, "starting probe loop");
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately; the startup probe covers it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => dispatch_probe(&dispatcher, &session, &pending, "interval"),
                () = &mut shutdown => break,
            }
        }
    }

    match pending.cancel_all() {
        Ok(cancelled) => tracing::info!(cancelled, "pending probes cancelled"),
        Err(e) => tracing::warn!(error = %e, "failed to cancel some pending probes"),
    }
    pending.reap();
    if tokio::time::timeout(DRAIN_TIMEOUT, pending.drained())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = pending.count(),
            "timed out waiting for pending probes"
        );
    }

    session.close();
    tracing::info!("dbrelay agent shut down");
}

/// Dispatches one tracked probe and logs its outcome once it completes.
fn dispatch_probe(
    dispatcher: &Dispatcher,
    session: &Session,
    pending: &Arc<PendingOperations>,
    kind: &'static str,
) {
    dispatcher.dispatch_tracked(session, pending, probe::probe, move |outcome| match outcome {
        Ok(report) => tracing::info!(
            kind,
            backend_user = %report.backend_user,
            "probe succeeded"
        ),
        Err(e) if e.is_cancelled() => {
            tracing::info!(operation_id = %e.id(), kind, "probe cancelled")
        }
        Err(e) => tracing::error!(operation_id = %e.id(), kind, error = %e, "probe failed"),
    });
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
