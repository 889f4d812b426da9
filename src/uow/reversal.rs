//! Record reversal
//!
//! Turns a session's pending mutations into their inverse and persists the
//! inverse. Applied to sessions that already committed during a failed
//! unit of work.
//!
//! Per tracked record:
//! - `Modified`: flagged fields get their original value back
//! - `Deleted`: the delete is cancelled (`Modified`, then `Unchanged`);
//!   if a save already removed the row, it is queued for re-insertion
//!   with its original values
//! - `Added`: becomes `Deleted`, so the next save removes the row
//!
//! A concurrency conflict while saving the inverse is expected (the row's
//! token moved) and is swallowed. Any other save error is returned.

use tokio_util::sync::CancellationToken;

use crate::observability::{Event, Logger};
use crate::session::{PersistenceSession, SaveError};
use crate::tracking::{ChangeTracker, RecordState};

/// What a reversal did to one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReversalSummary {
    /// Modified records whose fields were copied back
    pub reverted: usize,
    /// Pending deletes cancelled, re-inserted where the row was gone
    pub restored: usize,
    /// Added records queued for removal
    pub removed: usize,
    /// Writes the store accepted
    pub writes: usize,
    /// The inverse save hit a concurrency conflict and was dropped
    pub conflict_swallowed: bool,
}

impl ReversalSummary {
    /// True if the session had nothing to reverse
    pub fn is_noop(&self) -> bool {
        self.reverted == 0 && self.restored == 0 && self.removed == 0
    }
}

/// Rewrite every pending record in `tracker` into its inverse
pub fn plan_reversal(tracker: &mut ChangeTracker) -> ReversalSummary {
    let mut summary = ReversalSummary::default();

    for key in tracker.keys() {
        match tracker.state_of(&key) {
            RecordState::Modified => {
                if let Some(record) = tracker.get_mut(&key) {
                    record.revert_modified();
                    summary.reverted += 1;
                }
            }
            RecordState::Deleted => {
                let removed = match tracker.get_mut(&key) {
                    Some(record) if record.is_removed() => {
                        record.restore_originals();
                        true
                    }
                    _ => false,
                };
                let cancelled = tracker
                    .set_state(&key, RecordState::Modified)
                    .and_then(|_| tracker.set_state(&key, RecordState::Unchanged));
                if cancelled.is_ok() {
                    if removed {
                        if let Some(record) = tracker.get_mut(&key) {
                            record.schedule_restore();
                        }
                    }
                    summary.restored += 1;
                }
            }
            RecordState::Added => {
                if tracker.set_state(&key, RecordState::Deleted).is_ok() {
                    summary.removed += 1;
                }
            }
            RecordState::Unchanged | RecordState::Detached => {}
        }
    }

    summary
}

/// Reverse one session's pending mutations and persist the inverse.
///
/// Returns immediately when the session has nothing pending. On success
/// every record is left `Unchanged` or untracked.
pub async fn reverse(
    session: &dyn PersistenceSession,
    force_detect: bool,
    cancel: &CancellationToken,
) -> Result<ReversalSummary, SaveError> {
    if force_detect {
        session.detect_changes();
    }
    if !session.has_changes() {
        return Ok(ReversalSummary::default());
    }

    let mut summary = ReversalSummary::default();
    session.with_tracker(&mut |tracker| summary = plan_reversal(tracker));

    match session.save_changes(cancel).await {
        Ok(writes) => summary.writes = writes,
        Err(SaveError::Conflict(conflict)) => {
            summary.conflict_swallowed = true;
            let id = session.id().to_string();
            let key = conflict.key().to_string();
            Logger::warn(
                Event::ReversalConflictSwallowed.as_str(),
                &[
                    ("key", key.as_str()),
                    ("kind", session.kind()),
                    ("session", id.as_str()),
                ],
            );
        }
        Err(other) => return Err(other),
    }

    session.accept_all_changes();
    Ok(summary)
}
