//! Session registry
//!
//! Keeps every session opened during a unit of work, in creation order.
//! Factories are handed in explicitly at construction, one per session
//! kind; nothing is resolved from ambient context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::errors::{PersistenceError, RegistryError};
use super::session::{PersistenceSession, SessionId};
use crate::observability::{Event, Logger};

/// Marker type naming one logical database
pub trait SessionKind: 'static {
    /// Session type the kind's factory produces
    type Session: PersistenceSession + 'static;

    /// Name used in logs and errors
    const NAME: &'static str;
}

/// Opens sessions of one concrete type
pub trait SessionFactory<S>: Send + Sync {
    fn create(&self, id: SessionId) -> Result<Arc<S>, PersistenceError>;
}

impl<S, F> SessionFactory<S> for F
where
    F: Fn(SessionId) -> Result<Arc<S>, PersistenceError> + Send + Sync,
{
    fn create(&self, id: SessionId) -> Result<Arc<S>, PersistenceError> {
        self(id)
    }
}

struct FactoryEntry {
    name: &'static str,
    /// `Arc<dyn SessionFactory<K::Session>>` behind `Any`
    factory: Box<dyn Any + Send + Sync>,
}

/// Outcome of tearing the registry down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Sessions released cleanly
    pub disposed: usize,
    /// Sessions whose release failed (errors are logged and dropped)
    pub failed: usize,
}

/// Builder collecting one factory per session kind
#[derive(Default)]
pub struct SessionRegistryBuilder {
    factories: HashMap<TypeId, FactoryEntry>,
    duplicate: Option<&'static str>,
}

impl SessionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for kind `K`
    pub fn register<K: SessionKind>(
        mut self,
        factory: impl SessionFactory<K::Session> + 'static,
    ) -> Self {
        let type_id = TypeId::of::<K>();
        if self.factories.contains_key(&type_id) {
            self.duplicate.get_or_insert(K::NAME);
            return self;
        }
        let factory: Arc<dyn SessionFactory<K::Session>> = Arc::new(factory);
        self.factories.insert(
            type_id,
            FactoryEntry {
                name: K::NAME,
                factory: Box::new(factory),
            },
        );
        self
    }

    /// Finish the registry. Fails if any kind was registered twice.
    pub fn build(self) -> Result<SessionRegistry, RegistryError> {
        if let Some(kind) = self.duplicate {
            return Err(RegistryError::DuplicateKind(kind));
        }
        Ok(SessionRegistry {
            factories: self.factories,
            sessions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        })
    }
}

/// Ordered set of the sessions opened during one unit of work
pub struct SessionRegistry {
    factories: HashMap<TypeId, FactoryEntry>,
    sessions: RwLock<Vec<Arc<dyn PersistenceSession>>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl SessionRegistry {
    pub fn builder() -> SessionRegistryBuilder {
        SessionRegistryBuilder::new()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn PersistenceSession>>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn PersistenceSession>>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new session of kind `K` and append it to the ordered list.
    ///
    /// Must not race a commit of the same unit of work: sessions created
    /// while a commit is running are not part of that commit.
    pub fn create_session<K: SessionKind>(&self) -> Result<Arc<K::Session>, RegistryError> {
        if self.is_disposed() {
            return Err(RegistryError::Disposed);
        }
        let factory = self
            .factories
            .get(&TypeId::of::<K>())
            .and_then(|entry| {
                entry
                    .factory
                    .downcast_ref::<Arc<dyn SessionFactory<K::Session>>>()
            })
            .ok_or(RegistryError::UnknownKind(K::NAME))?;

        let mut sessions = self.write();
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = factory
            .create(id)
            .map_err(|source| RegistryError::Factory {
                kind: K::NAME,
                source,
            })?;
        let tracked: Arc<dyn PersistenceSession> = session.clone();
        sessions.push(tracked);
        drop(sessions);

        let id = id.to_string();
        Logger::trace(
            Event::SessionCreated.as_str(),
            &[("kind", K::NAME), ("session", id.as_str())],
        );
        Ok(session)
    }

    /// Snapshot of every session, oldest first
    pub fn list_sessions(&self) -> Vec<Arc<dyn PersistenceSession>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Names of the registered kinds, sorted
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.values().map(|entry| entry.name).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Release every session. Idempotent; never fails.
    pub fn dispose(&self) -> DisposeReport {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return DisposeReport::default();
        }
        let sessions = std::mem::take(&mut *self.write());
        let mut report = DisposeReport::default();
        for session in sessions {
            match session.dispose() {
                Ok(()) => report.disposed += 1,
                Err(e) => {
                    report.failed += 1;
                    let id = session.id().to_string();
                    let reason = e.to_string();
                    Logger::warn(
                        Event::SessionDisposeFailed.as_str(),
                        &[
                            ("kind", session.kind()),
                            ("reason", reason.as_str()),
                            ("session", id.as_str()),
                        ],
                    );
                }
            }
        }
        let disposed = report.disposed.to_string();
        let failed = report.failed.to_string();
        Logger::info(
            Event::RegistryDisposed.as_str(),
            &[("disposed", disposed.as_str()), ("failed", failed.as_str())],
        );
        report
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("kinds", &self.kinds())
            .field("sessions", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
