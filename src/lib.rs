//! unitofwork - all-or-nothing commits across in-process persistence sessions
//!
//! A `UnitOfWork` owns a registry of sessions, each bound to one logical
//! database. `commit` saves every session in creation order; if one fails,
//! the sessions already saved in that call are reversed by replaying the
//! inverse of their mutations.
//!
//! This is not two-phase commit: there is no durability across a crash and
//! a failed reversal can leave stores inconsistent (`RollbackFailure`).

pub mod config;
pub mod observability;
pub mod session;
pub mod store;
pub mod tracking;
pub mod uow;

pub use config::{ConfigError, UnitOfWorkConfig};
pub use session::{
    ConcurrencyConflictError, PersistenceError, PersistenceSession, SaveError, SessionId,
    SessionKind, SessionRegistry, StoreSession,
};
pub use uow::{CommitError, CommitFailure, RollbackFailure, UnitOfWork};
