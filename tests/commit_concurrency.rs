//! Commit Concurrency Tests
//!
//! - Concurrent commits on one unit of work never interleave
//! - Cancellation while waiting for the gate touches nothing
//! - Cancellation observed at a session commit rolls back the prefix

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use unitofwork::session::SaveResult;
use unitofwork::store::{Constraint, MemoryStore};
use unitofwork::tracking::{ChangeTracker, Document, RecordKey};
use unitofwork::{
    CommitError, PersistenceError, PersistenceSession, SessionId, SessionKind, SessionRegistry,
    StoreSession, UnitOfWork, UnitOfWorkConfig,
};

struct Sales;
impl SessionKind for Sales {
    type Session = StoreSession;
    const NAME: &'static str = "sales";
}

struct Billing;
impl SessionKind for Billing {
    type Session = StoreSession;
    const NAME: &'static str = "billing";
}

fn order(customer: Option<&str>) -> Document {
    let mut doc = Document::new();
    if let Some(customer) = customer {
        doc.insert("customer".to_string(), json!(customer));
    }
    doc.insert("total".to_string(), json!(10));
    doc
}

// =============================================================================
// Mutual Exclusion
// =============================================================================

/// Counts saves in flight across every session sharing the counter
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct GuardedSession {
    inner: StoreSession,
    in_flight: Arc<InFlight>,
}

impl PersistenceSession for GuardedSession {
    fn id(&self) -> SessionId {
        self.inner.id()
    }

    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn auto_detect_changes(&self) -> bool {
        self.inner.auto_detect_changes()
    }

    fn detect_changes(&self) {
        self.inner.detect_changes()
    }

    fn has_changes(&self) -> bool {
        self.inner.has_changes()
    }

    fn with_tracker(&self, f: &mut dyn FnMut(&mut ChangeTracker)) {
        self.inner.with_tracker(f)
    }

    fn save_changes<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SaveResult<usize>> {
        Box::pin(async move {
            let now = self.in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.peak.fetch_max(now, Ordering::SeqCst);
            let result = self.inner.save_changes(cancel).await;
            self.in_flight.current.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn dispose(&self) -> Result<(), PersistenceError> {
        self.inner.dispose()
    }
}

struct Guarded;
impl SessionKind for Guarded {
    type Session = GuardedSession;
    const NAME: &'static str = "guarded";
}

/// Two commits racing on one unit of work: saves never overlap, and the
/// second sees the first's outcome fully settled.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_do_not_interleave() {
    let store = Arc::new(
        MemoryStore::new("ledger")
            .with_io_delay(Duration::from_millis(5))
            .with_constraint(Constraint::required("entries", "customer")),
    );
    let in_flight = Arc::new(InFlight::default());
    let factory_store = Arc::clone(&store);
    let factory_counter = Arc::clone(&in_flight);
    let registry = SessionRegistry::builder()
        .register::<Guarded>(
            move |id: SessionId| -> Result<Arc<GuardedSession>, PersistenceError> {
                Ok(Arc::new(GuardedSession {
                    inner: StoreSession::new(id, Arc::clone(&factory_store)),
                    in_flight: Arc::clone(&factory_counter),
                }))
            },
        )
        .build()
        .unwrap();
    // a serial sweep, so any overlap can only come from interleaved commits
    let config = UnitOfWorkConfig::default().with_rollback_parallelism(1);
    let uow = Arc::new(UnitOfWork::with_config(registry, config).unwrap());

    for i in 0..4 {
        let session = uow.create_session::<Guarded>().unwrap();
        let doc = if i == 3 { order(None) } else { order(Some("acme")) };
        session.inner.add("entries", &format!("e-{}", i), doc).unwrap();
    }

    let first = {
        let uow = Arc::clone(&uow);
        tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
    };
    let second = {
        let uow = Arc::clone(&uow);
        tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(in_flight.peak.load(Ordering::SeqCst), 1);

    // one call failed and rolled back, the other found nothing to do
    let failures = results.iter().filter(|r| r.is_err()).count();
    let successes = results.iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(failures, 1);
    assert_eq!(successes, 1);
    assert_eq!(store.row_count("entries"), 0);
    assert_eq!(uow.metrics().snapshot().commits_attempted, 2);
}

/// Sequential callers on a shared unit of work each observe a settled state.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_commits_all_succeed() {
    let store = Arc::new(MemoryStore::new("sales").with_io_delay(Duration::from_millis(1)));
    let registry = SessionRegistry::builder()
        .register::<Sales>(StoreSession::factory(Arc::clone(&store)))
        .build()
        .unwrap();
    let uow = Arc::new(UnitOfWork::new(registry));
    let session = uow.create_session::<Sales>().unwrap();
    session.add("orders", "o-1", order(Some("acme"))).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let uow = Arc::clone(&uow);
            tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    // the insert happened exactly once
    assert_eq!(store.commit_count(), 1);
    assert_eq!(uow.metrics().snapshot().commits_succeeded, 8);
}

/// A commit driven from a spawned task fails and runs its rollback sweep
/// there, on a multi-threaded runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_commit_rolls_back() {
    let sales = Arc::new(MemoryStore::new("sales"));
    let billing = Arc::new(
        MemoryStore::new("billing").with_constraint(Constraint::required("invoices", "customer")),
    );
    let registry = SessionRegistry::builder()
        .register::<Sales>(StoreSession::factory(Arc::clone(&sales)))
        .register::<Billing>(StoreSession::factory(Arc::clone(&billing)))
        .build()
        .unwrap();
    let uow = Arc::new(UnitOfWork::new(registry));

    for i in 0..3 {
        let a = uow.create_session::<Sales>().unwrap();
        a.add("orders", &format!("o-{}", i), order(Some("acme"))).unwrap();
    }
    let b = uow.create_session::<Billing>().unwrap();
    b.add("invoices", "i-1", order(None)).unwrap();

    let handle = {
        let uow = Arc::clone(&uow);
        tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
    };
    let err = handle.await.unwrap().unwrap_err();

    assert_eq!(err.session(), Some(b.id()));
    assert!(!err.is_rollback_failure());
    assert_eq!(sales.row_count("orders"), 0);
    assert_eq!(uow.metrics().snapshot().sessions_reverted, 3);
}

// =============================================================================
// Cancellation
// =============================================================================

/// A caller cancelled while another commit holds the gate gets
/// `Cancelled` and leaves the ledger alone.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_waiting_for_gate() {
    let store = Arc::new(MemoryStore::new("sales").with_io_delay(Duration::from_millis(200)));
    let registry = SessionRegistry::builder()
        .register::<Sales>(StoreSession::factory(Arc::clone(&store)))
        .build()
        .unwrap();
    let uow = Arc::new(UnitOfWork::new(registry));
    let session = uow.create_session::<Sales>().unwrap();
    session.add("orders", "o-1", order(Some("acme"))).unwrap();

    let holder = {
        let uow = Arc::clone(&uow);
        tokio::spawn(async move { uow.commit(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    let waiter = {
        let uow = Arc::clone(&uow);
        let cancel = cancel.clone();
        tokio::spawn(async move { uow.commit(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let waited = waiter.await.unwrap();
    assert!(matches!(waited, Err(CommitError::Cancelled)));
    assert!(holder.await.unwrap().unwrap());

    assert!(uow.last_failure().is_none());
    assert!(store.contains(&RecordKey::new("orders", "o-1")));
    let metrics = uow.metrics().snapshot();
    assert_eq!(metrics.commits_cancelled, 1);
    assert_eq!(metrics.commits_attempted, 1);
}

/// Cancellation during B's save fails B; A's committed insert is rolled
/// back even though the caller's token has fired.
#[tokio::test]
async fn test_cancel_during_session_commit_rolls_back() {
    let sales = Arc::new(MemoryStore::new("sales"));
    let billing = Arc::new(MemoryStore::new("billing").with_io_delay(Duration::from_millis(500)));
    let registry = SessionRegistry::builder()
        .register::<Sales>(StoreSession::factory(Arc::clone(&sales)))
        .register::<Billing>(StoreSession::factory(Arc::clone(&billing)))
        .build()
        .unwrap();
    let uow = UnitOfWork::new(registry);

    let a = uow.create_session::<Sales>().unwrap();
    let b = uow.create_session::<Billing>().unwrap();
    a.add("orders", "o-1", order(Some("acme"))).unwrap();
    b.add("invoices", "i-1", order(Some("acme"))).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    };

    let (result, _) = tokio::join!(uow.commit(&cancel), canceller);
    let err = result.unwrap_err();

    match &err {
        CommitError::Interrupted { session, .. } => assert_eq!(*session, b.id()),
        other => panic!("expected interrupted commit, got {:?}", other),
    }
    assert!(uow.last_failure().unwrap().error().is_cancelled());
    assert!(!sales.contains(&RecordKey::new("orders", "o-1")));
    assert!(!billing.contains(&RecordKey::new("invoices", "i-1")));
    assert_eq!(billing.commit_count(), 0);
}
