//! Persistence sessions
//!
//! A session wraps one connection to a logical database together with its
//! change tracker. This module provides:
//! - `PersistenceSession` - the boundary the coordinator commits through
//! - `StoreSession` - a session over an in-memory `MemoryStore`
//! - `SessionRegistry` - creation-ordered bookkeeping and teardown
//! - the save error taxonomy shared by sessions and the coordinator

mod errors;
mod registry;
#[allow(clippy::module_inception)]
mod session;
mod store_session;

pub use errors::{
    ConcurrencyConflictError, PersistenceError, PersistenceErrorKind, RegistryError, SaveError,
    SaveResult,
};
pub use registry::{
    DisposeReport, SessionFactory, SessionKind, SessionRegistry, SessionRegistryBuilder,
};
pub use session::{PersistenceSession, SessionId};
pub use store_session::{AuditFields, StoreSession};
