//! Dispatcher and pending-operation tests against a file database, so that
//! every worker session sees the same data.

use std::sync::Arc;
use std::time::Duration;

use dbrelay_db::{DbError, DispatchError, Dispatcher, PendingOperations, Registry, Session, Value};
use dbrelay_types::ConnectionData;
use tempfile::TempDir;
use tokio::sync::oneshot;

const ENDLESS_QUERY: &str =
    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n";

fn setup() -> (TempDir, Arc<Registry>, Session) {
    let dir = TempDir::new().expect("tempdir");
    let registry = Arc::new(Registry::new());
    let host = dir.path().to_string_lossy();
    let data = ConnectionData::new("jobs.db").with_host(host);
    let mut session = Session::new(Arc::clone(&registry));
    session.open(&data).expect("failed to open database");
    session
        .execute("CREATE TABLE jobs (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .expect("failed to create table");
    session
        .execute("INSERT INTO jobs (name) VALUES ('a'), ('b'), ('c')")
        .expect("failed to seed table");
    (dir, registry, session)
}

#[tokio::test(flavor = "multi_thread")]
async fn result_is_delivered_to_the_caller() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |s| {
        s.simple_list("SELECT name FROM jobs ORDER BY id")
    });
    assert_ne!(job.id(), session.id(), "worker runs on its own connection");

    let names = job.join().await.expect("dispatch should succeed");
    assert_eq!(names, ["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_error_is_wrapped_with_its_message() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |s| s.execute("SELECT * FROM missing_table"));
    let id = job.id();
    let err = job.join().await.expect_err("table does not exist");

    assert_eq!(err.id(), id);
    assert!(matches!(err.db_error(), Some(DbError::Query(_))), "{err:?}");
    assert!(err.to_string().contains("missing_table"), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn unopened_template_fails_on_the_worker() {
    let registry = Arc::new(Registry::new());
    let template = Session::new(Arc::clone(&registry));
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let err = dispatcher
        .dispatch(&template, |s| s.execute("SELECT 1"))
        .join()
        .await
        .expect_err("no connection data to copy");
    let source = err.db_error();
    assert!(matches!(source, Some(DbError::Connection(_))), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_panic_is_reported_as_aborted() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |_| -> Result<(), DbError> {
        panic!("worker gave up");
    });
    let id = job.id();
    let err = job.join().await.expect_err("worker panicked");

    assert!(matches!(err, DispatchError::Aborted { .. }), "{err:?}");
    assert_eq!(err.id(), id);
    assert!(err.db_error().is_none());
    assert!(!registry.exists(id), "reservation is released on unwind");
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_dispatch_uses_adjusted_data() {
    let (dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch_configured(
        &session,
        |data| data.db_name = "other.db".to_string(),
        |s| s.simple_list("SELECT name FROM sqlite_master WHERE type = 'table'"),
    );
    let tables = job.join().await.expect("dispatch should succeed");
    assert!(tables.is_empty(), "fresh database: {tables:?}");
    assert!(dir.path().join("other.db").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_before_the_statement_starts() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |s| {
        std::thread::sleep(Duration::from_millis(300));
        s.execute("SELECT 1")
    });
    let token = job.cancellation();
    assert!(job.cancel().expect("cancel should be delivered"));

    let err = job.join().await.expect_err("operation was cancelled");
    assert!(err.is_cancelled(), "{err:?}");
    assert!(token.is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_interrupts_a_running_statement() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |s| s.scalar(ENDLESS_QUERY));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!job.is_finished());
    assert!(job.cancel().expect("cancel should be delivered"));

    let err = tokio::time::timeout(Duration::from_secs(10), job.join())
        .await
        .expect("cancelled statement should stop")
        .expect_err("operation was cancelled");
    let DispatchError::Failed { source, .. } = err else {
        panic!("worker should report a failure");
    };
    assert!(matches!(source, DbError::OperationCancelled { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn double_cancel_reports_one_cancellation() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));

    let job = dispatcher.dispatch(&session, |s| s.scalar(ENDLESS_QUERY));
    let id = job.id();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(job.cancel().expect("first cancel"));
    assert!(job.cancel().is_ok(), "second cancel is harmless");

    let err = tokio::time::timeout(Duration::from_secs(10), job.join())
        .await
        .expect("cancelled statement should stop")
        .expect_err("operation was cancelled");
    assert!(err.is_cancelled(), "{err:?}");

    assert!(!registry.exists(id));
    let late = dbrelay_db::cancel_operation(&registry, id);
    assert!(matches!(late, Ok(false)), "{late:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn registry_returns_to_its_size_after_concurrent_dispatches() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    assert_eq!(registry.len(), 1);

    let jobs: Vec<_> = (0..16)
        .map(|i| {
            dispatcher.dispatch(&session, move |s| {
                s.scalar(&format!("SELECT {i} + count(*) FROM jobs"))
            })
        })
        .collect();

    for (i, job) in jobs.into_iter().enumerate() {
        let value = job.join().await.expect("dispatch should succeed");
        assert_eq!(value, Some(Value::Integer(i as i64 + 3)));
    }
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_callback_receives_the_result() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let (tx, rx) = oneshot::channel();

    let id = dispatcher.dispatch_then(
        &session,
        |s| s.scalar("SELECT count(*) FROM jobs"),
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );

    let outcome = rx.await.expect("callback should run");
    assert_eq!(outcome.expect("should succeed"), Some(Value::Integer(3)));
    assert!(!registry.exists(id));
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_operations_cancel_and_drain() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let pending = PendingOperations::new(Arc::clone(&registry));

    let jobs: Vec<_> = (0..3)
        .map(|_| {
            let job = dispatcher.dispatch(&session, |s| s.scalar(ENDLESS_QUERY));
            pending.track(&job);
            job
        })
        .collect();
    assert_eq!(pending.count(), 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pending.cancel_all().expect("cancel all"), 3);

    for job in jobs {
        let err = tokio::time::timeout(Duration::from_secs(10), job.join())
            .await
            .expect("cancelled statement should stop")
            .expect_err("operation was cancelled");
        assert!(err.is_cancelled(), "{err:?}");
    }

    assert_eq!(pending.reap(), 0);
    tokio::time::timeout(Duration::from_secs(1), pending.drained())
        .await
        .expect("tracker should be drained");
}

#[tokio::test(flavor = "multi_thread")]
async fn tracked_dispatch_reaps_on_completion() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let pending = Arc::new(PendingOperations::new(Arc::clone(&registry)));
    let (tx, rx) = oneshot::channel();

    let id = dispatcher.dispatch_tracked(
        &session,
        &pending,
        |s| {
            std::thread::sleep(Duration::from_millis(100));
            s.scalar("SELECT count(*) FROM jobs")
        },
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );
    assert!(pending.contains(id), "tracked before dispatch returns");

    tokio::time::timeout(Duration::from_secs(10), pending.drained())
        .await
        .expect("tracker should drain without a manual reap");
    assert_eq!(pending.count(), 0);
    assert!(!registry.exists(id));

    let outcome = rx.await.expect("callback should run first");
    assert_eq!(outcome.expect("should succeed"), Some(Value::Integer(3)));
}

#[tokio::test(flavor = "multi_thread")]
async fn tracked_dispatch_drains_after_cancel_all() {
    let (_dir, registry, session) = setup();
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let pending = Arc::new(PendingOperations::new(Arc::clone(&registry)));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for _ in 0..3 {
        let tx = tx.clone();
        dispatcher.dispatch_tracked(
            &session,
            &pending,
            |s| s.scalar(ENDLESS_QUERY),
            move |outcome| {
                let _ = tx.send(outcome.map(|_| ()));
            },
        );
    }
    drop(tx);
    assert_eq!(pending.count(), 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(pending.cancel_all().expect("cancel all"), 3);

    tokio::time::timeout(Duration::from_secs(10), pending.drained())
        .await
        .expect("cancelled operations should drain");
    while let Some(outcome) = rx.recv().await {
        let err = outcome.expect_err("operation was cancelled");
        assert!(err.is_cancelled(), "{err:?}");
    }
    assert_eq!(registry.len(), 1);
}
