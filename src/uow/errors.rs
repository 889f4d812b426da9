//! Commit outcome errors
//!
//! Error codes:
//! - UOW_PERSISTENCE_FAILED (a session failed for a non-conflict reason)
//! - UOW_CONCURRENCY_CONFLICT (a session's row changed since it was read)
//! - UOW_COMMIT_INTERRUPTED (cancellation observed at a session commit)
//! - UOW_ROLLBACK_FAILED (FATAL: reversal of a committed session failed)
//! - UOW_COMMIT_CANCELLED (cancelled while waiting for the commit gate)
//! - UOW_DISPOSED (unit of work used after teardown)
//!
//! Every failure except `Cancelled` and `Disposed` has already rolled back
//! the committed prefix by the time the caller sees it.

use thiserror::Error;

use super::ledger::CommitFailure;
use crate::session::{ConcurrencyConflictError, PersistenceError, SaveError, SessionId};

/// Reversal of one committed session failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reversal of {session} ({kind}) failed: {reason}")]
pub struct ReversalError {
    pub session: SessionId,
    pub kind: String,
    pub reason: SaveError,
}

/// Rollback could not undo an already-committed session.
///
/// Stores may now disagree with each other. The commit failure that
/// triggered the rollback is the error's source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rollback failed, stores may be inconsistent: {reversal}")]
pub struct RollbackFailure {
    reversal: ReversalError,
    #[source]
    trigger: CommitFailure,
}

impl RollbackFailure {
    pub fn new(reversal: ReversalError, trigger: CommitFailure) -> Self {
        Self { reversal, trigger }
    }

    /// Session whose reversal failed
    pub fn session(&self) -> SessionId {
        self.reversal.session
    }

    pub fn kind(&self) -> &str {
        &self.reversal.kind
    }

    /// Why the reversal failed
    pub fn reason(&self) -> &SaveError {
        &self.reversal.reason
    }

    /// The commit failure that started the rollback
    pub fn trigger(&self) -> &CommitFailure {
        &self.trigger
    }
}

/// Outcome of a failed `commit`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("{session} ({kind}) failed to commit: {source}")]
    Persistence {
        session: SessionId,
        kind: String,
        #[source]
        source: PersistenceError,
    },

    #[error("{session} ({kind}) failed to commit: {source}")]
    Conflict {
        session: SessionId,
        kind: String,
        #[source]
        source: ConcurrencyConflictError,
    },

    /// Cancellation reached a session commit; earlier sessions were rolled back
    #[error("commit interrupted by cancellation at {session} ({kind})")]
    Interrupted { session: SessionId, kind: String },

    #[error(transparent)]
    Rollback(Box<RollbackFailure>),

    /// Cancelled before the commit gate was acquired; nothing was touched
    #[error("commit cancelled while waiting for the commit gate")]
    Cancelled,

    #[error("unit of work has been disposed")]
    Disposed,
}

impl CommitError {
    /// Map a session's save failure to the error surfaced by `commit`
    pub(crate) fn from_save(session: SessionId, kind: &str, error: SaveError) -> Self {
        let kind = kind.to_string();
        match error {
            SaveError::Persistence(source) => CommitError::Persistence {
                session,
                kind,
                source,
            },
            SaveError::Conflict(source) => CommitError::Conflict {
                session,
                kind,
                source,
            },
            SaveError::Cancelled => CommitError::Interrupted { session, kind },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitError::Conflict { .. })
    }

    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, CommitError::Rollback(_))
    }

    /// Session the error is attributed to
    pub fn session(&self) -> Option<SessionId> {
        match self {
            CommitError::Persistence { session, .. }
            | CommitError::Conflict { session, .. }
            | CommitError::Interrupted { session, .. } => Some(*session),
            CommitError::Rollback(failure) => Some(failure.session()),
            CommitError::Cancelled | CommitError::Disposed => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CommitError::Persistence { .. } => "UOW_PERSISTENCE_FAILED",
            CommitError::Conflict { .. } => "UOW_CONCURRENCY_CONFLICT",
            CommitError::Interrupted { .. } => "UOW_COMMIT_INTERRUPTED",
            CommitError::Rollback(_) => "UOW_ROLLBACK_FAILED",
            CommitError::Cancelled => "UOW_COMMIT_CANCELLED",
            CommitError::Disposed => "UOW_DISPOSED",
        }
    }
}

impl From<RollbackFailure> for CommitError {
    fn from(failure: RollbackFailure) -> Self {
        CommitError::Rollback(Box::new(failure))
    }
}

/// Result type for coordinator operations
pub type CommitResult<T> = Result<T, CommitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RecordKey;
    use std::error::Error;

    #[test]
    fn test_from_save_maps_each_kind() {
        let id = SessionId::new(2);
        let persistence = CommitError::from_save(
            id,
            "billing",
            PersistenceError::store_unavailable("down").into(),
        );
        let conflict = CommitError::from_save(
            id,
            "billing",
            ConcurrencyConflictError::new(RecordKey::new("t", "1"), 1, None).into(),
        );
        let interrupted = CommitError::from_save(id, "billing", SaveError::Cancelled);

        assert_eq!(persistence.code(), "UOW_PERSISTENCE_FAILED");
        assert!(conflict.is_conflict());
        assert_eq!(interrupted.code(), "UOW_COMMIT_INTERRUPTED");
        assert_eq!(interrupted.session(), Some(id));
    }

    #[test]
    fn test_rollback_failure_chains_trigger() {
        let trigger = CommitFailure::unattributed(
            PersistenceError::constraint_violation("total must be positive").into(),
        );
        let failure = RollbackFailure::new(
            ReversalError {
                session: SessionId::new(1),
                kind: "orders".to_string(),
                reason: PersistenceError::store_unavailable("disk gone").into(),
            },
            trigger,
        );
        let err: CommitError = failure.into();

        assert!(err.is_rollback_failure());
        assert_eq!(err.session(), Some(SessionId::new(1)));
        assert!(err.to_string().contains("disk gone"));

        // transparent: the source is the trigger, then the trigger's save error
        let trigger = err.source().unwrap();
        assert!(trigger.to_string().contains("commit failed"));
        let cause = trigger.source().unwrap();
        assert!(cause.to_string().contains("total must be positive"));
    }

    #[test]
    fn test_gate_errors_have_no_session() {
        assert_eq!(CommitError::Cancelled.session(), None);
        assert_eq!(CommitError::Disposed.code(), "UOW_DISPOSED");
    }
}
