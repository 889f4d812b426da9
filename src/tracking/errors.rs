//! Change tracking errors

use thiserror::Error;

use super::record::RecordKey;

/// Result type for change tracking operations
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors raised while mutating a session's tracked records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// The record is not in the session's change log
    #[error("record {0} is not tracked")]
    NotTracked(RecordKey),

    /// A record with the same key is already tracked
    #[error("record {0} is already tracked")]
    AlreadyTracked(RecordKey),

    /// The record is pending deletion and cannot be written
    #[error("record {0} is pending deletion")]
    RecordDeleted(RecordKey),

    /// The owning session has been disposed
    #[error("session has been disposed")]
    SessionDisposed,
}

impl TrackingError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotTracked(_) => "UOW_RECORD_NOT_TRACKED",
            Self::AlreadyTracked(_) => "UOW_RECORD_ALREADY_TRACKED",
            Self::RecordDeleted(_) => "UOW_RECORD_DELETED",
            Self::SessionDisposed => "UOW_SESSION_DISPOSED",
        }
    }
}
