//! Unit of Work Lifecycle Tests
//!
//! - Configuration loaded from disk drives the coordinator; the log level
//!   is applied only through an explicit logging init
//! - Dispose waits for a running commit, then releases every session
//! - Dropping the unit of work releases its sessions

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use unitofwork::observability::{Logger, Severity};
use unitofwork::session::RegistryError;
use unitofwork::store::MemoryStore;
use unitofwork::tracking::{Document, RecordKey, TrackingError};
use unitofwork::{
    CommitError, SessionKind, SessionRegistry, StoreSession, UnitOfWork, UnitOfWorkConfig,
};

struct Sales;
impl SessionKind for Sales {
    type Session = StoreSession;
    const NAME: &'static str = "sales";
}

fn order() -> Document {
    let mut doc = Document::new();
    doc.insert("customer".to_string(), json!("acme"));
    doc
}

fn registry(store: &Arc<MemoryStore>) -> SessionRegistry {
    SessionRegistry::builder()
        .register::<Sales>(StoreSession::factory(Arc::clone(store)))
        .build()
        .unwrap()
}

// =============================================================================
// Configuration
// =============================================================================

/// A config file on disk configures the unit of work.
#[tokio::test]
async fn test_unit_of_work_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"{"rollback_parallelism": 2, "clear_failed_session": false, "log_level": "warn"}"#,
    )
    .unwrap();

    let config = UnitOfWorkConfig::load(file.path()).unwrap();
    let store = Arc::new(MemoryStore::new("sales"));
    let uow = UnitOfWork::with_config(registry(&store), config).unwrap();

    assert_eq!(uow.config().rollback_parallelism, 2);
    assert!(!uow.config().clear_failed_session);
    // building the unit of work leaves the shared logger alone
    assert_eq!(Logger::min_severity(), Some(Severity::Info));

    uow.config().init_logging().unwrap();
    assert_eq!(Logger::min_severity(), Some(Severity::Warn));

    let session = uow.create_session::<Sales>().unwrap();
    session.add("orders", "o-1", order()).unwrap();
    assert!(uow.commit(&CancellationToken::new()).await.unwrap());
}

/// A broken config file never produces a unit of work.
#[test]
fn test_invalid_config_file_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(br#"{"rollback_parallelism": 0}"#).unwrap();

    let err = UnitOfWorkConfig::load(file.path()).unwrap_err();
    assert_eq!(err.code(), "UOW_CONFIG_INVALID");
}

// =============================================================================
// Disposal
// =============================================================================

/// Dispose waits for the running commit to finish before tearing down.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispose_waits_for_running_commit() {
    let store = Arc::new(MemoryStore::new("sales").with_io_delay(Duration::from_millis(100)));
    let uow = Arc::new(UnitOfWork::new(registry(&store)));
    let session = uow.create_session::<Sales>().unwrap();
    session.add("orders", "o-1", order()).unwrap();

    let commit = {
        let uow = Arc::clone(&uow);
        tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = uow.dispose().await;

    assert!(commit.await.unwrap().unwrap());
    assert_eq!(report.disposed, 1);
    assert_eq!(report.failed, 0);
    assert!(store.contains(&RecordKey::new("orders", "o-1")));
}

/// After dispose, commits and session creation are refused and the old
/// sessions are closed.
#[tokio::test]
async fn test_use_after_dispose() {
    let store = Arc::new(MemoryStore::new("sales"));
    let uow = UnitOfWork::new(registry(&store));
    let session = uow.create_session::<Sales>().unwrap();

    uow.dispose().await;
    // second dispose is a no-op
    assert_eq!(uow.dispose().await.disposed, 0);

    assert!(matches!(
        uow.commit(&CancellationToken::new()).await,
        Err(CommitError::Disposed)
    ));
    assert!(matches!(
        uow.create_session::<Sales>(),
        Err(RegistryError::Disposed)
    ));
    assert_eq!(
        session.add("orders", "o-1", order()),
        Err(TrackingError::SessionDisposed)
    );
}

/// Dropping the unit of work disposes its sessions.
#[test]
fn test_drop_disposes_sessions() {
    let store = Arc::new(MemoryStore::new("sales"));
    let session = {
        let uow = UnitOfWork::new(registry(&store));
        uow.create_session::<Sales>().unwrap()
    };

    assert_eq!(
        session.add("orders", "o-1", order()),
        Err(TrackingError::SessionDisposed)
    );
}
