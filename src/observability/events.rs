//! Observable events of the unit-of-work coordinator
//!
//! Every log line the crate writes names one of these events.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    // Registry
    /// Session created and registered
    SessionCreated,
    /// Session refused to dispose; registry carried on
    SessionDisposeFailed,
    /// Registry released every session
    RegistryDisposed,

    // Commit
    /// Session had no pending mutations and was not saved
    SessionSkipped,
    /// Session persisted its pending mutations
    SessionCommitted,
    /// Session failed to persist
    CommitFailed,
    /// Failure was an optimistic-concurrency conflict
    ConflictDetected,
    /// Every session accepted its changes after a full commit
    ChangesAccepted,

    // Rollback
    /// Compensating writes persisted for a session
    SessionReverted,
    /// Reversal hit a concurrency conflict and kept the concurrent value
    ReversalConflictSwallowed,
    /// Reversal of a committed session failed (FATAL)
    RollbackFailed,
    /// Failing session's mutation log was cleared after rollback
    FailedSessionCleared,

    // Configuration
    /// Configuration loaded from file
    ConfigLoaded,
}

impl Event {
    /// Returns the event name as emitted in the log line
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::SessionCreated => "UOW_SESSION_CREATED",
            Event::SessionDisposeFailed => "UOW_SESSION_DISPOSE_FAILED",
            Event::RegistryDisposed => "UOW_REGISTRY_DISPOSED",

            Event::SessionSkipped => "UOW_SESSION_SKIPPED",
            Event::SessionCommitted => "UOW_SESSION_COMMITTED",
            Event::CommitFailed => "UOW_SESSION_COMMIT_FAILED",
            Event::ConflictDetected => "UOW_CONFLICT_DETECTED",
            Event::ChangesAccepted => "UOW_CHANGES_ACCEPTED",

            Event::SessionReverted => "UOW_SESSION_REVERTED",
            Event::ReversalConflictSwallowed => "UOW_REVERSAL_CONFLICT_SWALLOWED",
            Event::RollbackFailed => "UOW_ROLLBACK_FAILED",
            Event::FailedSessionCleared => "UOW_FAILED_SESSION_CLEARED",

            Event::ConfigLoaded => "UOW_CONFIG_LOADED",
        }
    }

    /// Events that leave stores possibly inconsistent
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::RollbackFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
