//! Commit ledger
//!
//! Holds the cause of the most recent failed commit. Written at most once
//! per commit call, read by callers for diagnostics, replaced only by the
//! next failed commit.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::session::{PersistenceSession, SaveError, SessionId};

/// Cause of a failed commit: which session failed, and how
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("commit failed at {}: {error}", SessionLabel(.session))]
pub struct CommitFailure {
    session: Option<SessionId>,
    session_kind: Option<String>,
    #[source]
    error: SaveError,
    recorded_at: DateTime<Utc>,
}

struct SessionLabel<'a>(&'a Option<SessionId>);

impl fmt::Display for SessionLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => f.write_str("unknown session"),
        }
    }
}

impl CommitFailure {
    /// Failure attributed to `session`
    pub fn at_session(session: &dyn PersistenceSession, error: SaveError) -> Self {
        Self {
            session: Some(session.id()),
            session_kind: Some(session.kind().to_string()),
            error,
            recorded_at: Utc::now(),
        }
    }

    /// Failure that could not be attributed to a session
    pub fn unattributed(error: SaveError) -> Self {
        Self {
            session: None,
            session_kind: None,
            error,
            recorded_at: Utc::now(),
        }
    }

    /// Failing session, if known
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn session_kind(&self) -> Option<&str> {
        self.session_kind.as_deref()
    }

    /// The session's save error
    pub fn error(&self) -> &SaveError {
        &self.error
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// True when the session failed on a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        self.error.is_conflict()
    }
}

/// Last-failure slot of one coordinator
#[derive(Debug, Default)]
pub struct CommitLedger {
    last: RwLock<Option<CommitFailure>>,
}

impl CommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CommitFailure>> {
        self.last
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CommitFailure>> {
        self.last
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the recorded failure
    pub(crate) fn record(&self, failure: CommitFailure) {
        *self.write() = Some(failure);
    }

    /// Most recent failure, if any commit has failed
    pub fn last(&self) -> Option<CommitFailure> {
        self.read().clone()
    }

    pub fn is_last_conflict(&self) -> bool {
        self.read()
            .as_ref()
            .map(CommitFailure::is_conflict)
            .unwrap_or(false)
    }
}
