//! Persistence session boundary
//!
//! The coordinator only ever talks to sessions through this trait. It
//! covers what the persistence engine must expose: change detection,
//! commit of pending mutations, access to the tracked records, and
//! lifecycle.

use std::fmt;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::errors::{PersistenceError, SaveResult};
use crate::tracking::ChangeTracker;

/// Identity of a session.
///
/// Assigned by the registry in creation order, so comparing two ids
/// compares their creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One connection-scoped unit of change tracking against a logical database
pub trait PersistenceSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Name of the logical database this session is bound to
    fn kind(&self) -> &str;

    /// Whether saves and `has_changes` run detection on their own
    fn auto_detect_changes(&self) -> bool;

    /// Scan tracked records for drifted values
    fn detect_changes(&self);

    /// True if any tracked record is pending
    fn has_changes(&self) -> bool;

    /// Run `f` against the session's mutation log
    fn with_tracker(&self, f: &mut dyn FnMut(&mut ChangeTracker));

    /// Write every pending mutation to the store.
    ///
    /// Tracked states stay pending after a successful save; call
    /// `accept_all_changes` to settle them. Returns the number of writes.
    fn save_changes<'a>(&'a self, cancel: &'a CancellationToken)
        -> BoxFuture<'a, SaveResult<usize>>;

    /// Settle every pending state as stored
    fn accept_all_changes(&self) {
        self.with_tracker(&mut |tracker| tracker.accept_all_changes());
    }

    /// Forget every tracked record
    fn clear_tracking(&self) {
        self.with_tracker(&mut |tracker| tracker.clear());
    }

    /// Release the underlying connection
    fn dispose(&self) -> Result<(), PersistenceError>;
}
