//! Session error types
//!
//! Error codes:
//! - UOW_CONSTRAINT_VIOLATION (data/integrity failure on save)
//! - UOW_DUPLICATE_KEY (insert of an existing primary key)
//! - UOW_STORE_UNAVAILABLE (store refused the write)
//! - UOW_SESSION_DISPOSED (session used after teardown)
//! - UOW_CONCURRENCY_CONFLICT (row changed since it was read)
//! - UOW_SAVE_CANCELLED (cancellation observed before the write)

use std::fmt;

use thiserror::Error;

use crate::tracking::RecordKey;

/// Kinds of non-conflict persistence failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// A store constraint rejected the batch
    ConstraintViolation,
    /// Insert of a key that already exists
    DuplicateKey,
    /// The store could not accept the write
    StoreUnavailable,
    /// The session was used after disposal
    SessionDisposed,
}

impl PersistenceErrorKind {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConstraintViolation => "UOW_CONSTRAINT_VIOLATION",
            Self::DuplicateKey => "UOW_DUPLICATE_KEY",
            Self::StoreUnavailable => "UOW_STORE_UNAVAILABLE",
            Self::SessionDisposed => "UOW_SESSION_DISPOSED",
        }
    }
}

impl fmt::Display for PersistenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A save failed for a reason other than a concurrency conflict
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PersistenceError {
    kind: PersistenceErrorKind,
    message: String,
}

impl PersistenceError {
    pub fn new(kind: PersistenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::new(PersistenceErrorKind::ConstraintViolation, message)
    }

    pub fn duplicate_key(key: &RecordKey) -> Self {
        Self::new(
            PersistenceErrorKind::DuplicateKey,
            format!("record {} already exists", key),
        )
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(PersistenceErrorKind::StoreUnavailable, message)
    }

    pub fn session_disposed(session: impl fmt::Display) -> Self {
        Self::new(
            PersistenceErrorKind::SessionDisposed,
            format!("{} has been disposed", session),
        )
    }

    pub fn kind(&self) -> PersistenceErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A tracked record's row changed in the store since it was read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on {key}: expected version {expected}, found {}",
    found_label(.actual)
)]
pub struct ConcurrencyConflictError {
    key: RecordKey,
    expected: u64,
    actual: Option<u64>,
}

fn found_label(actual: &Option<u64>) -> String {
    match actual {
        Some(version) => version.to_string(),
        None => "no row".to_string(),
    }
}

impl ConcurrencyConflictError {
    /// `actual` is `None` when the row no longer exists
    pub fn new(key: RecordKey, expected: u64, actual: Option<u64>) -> Self {
        Self {
            key,
            expected,
            actual,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn expected_version(&self) -> u64 {
        self.expected
    }

    pub fn actual_version(&self) -> Option<u64> {
        self.actual
    }

    pub fn code(&self) -> &'static str {
        "UOW_CONCURRENCY_CONFLICT"
    }
}

/// Failure of a single session save
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflictError),

    /// Cancellation was observed before the batch reached the store
    #[error("save cancelled")]
    Cancelled,
}

impl SaveError {
    /// Returns true for concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Persistence(e) => e.code(),
            Self::Conflict(e) => e.code(),
            Self::Cancelled => "UOW_SAVE_CANCELLED",
        }
    }
}

/// Result type for session saves
pub type SaveResult<T> = Result<T, SaveError>;

/// Errors from the session registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No factory registered for the requested kind
    #[error("no session factory registered for kind '{0}'")]
    UnknownKind(&'static str),

    /// Two factories registered for one kind
    #[error("session kind '{0}' registered more than once")]
    DuplicateKind(&'static str),

    /// The factory failed to open a session
    #[error("factory for kind '{kind}' failed: {source}")]
    Factory {
        kind: &'static str,
        #[source]
        source: PersistenceError,
    },

    /// The registry has been torn down
    #[error("session registry has been disposed")]
    Disposed,
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownKind(_) => "UOW_UNKNOWN_SESSION_KIND",
            Self::DuplicateKind(_) => "UOW_DUPLICATE_SESSION_KIND",
            Self::Factory { .. } => "UOW_SESSION_FACTORY_FAILED",
            Self::Disposed => "UOW_REGISTRY_DISPOSED",
        }
    }
}
