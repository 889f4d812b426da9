//! Change tracking for persistence sessions
//!
//! Every session owns a `ChangeTracker`: an explicit mutation log holding,
//! per tracked record, its pending state and the original/current value of
//! each field. Reversal of a committed session is a pure transformation of
//! this log followed by another save.
//!
//! Record states:
//! - `Unchanged` - loaded or accepted, nothing pending
//! - `Added` - will be inserted on save
//! - `Modified` - flagged fields will be written on save
//! - `Deleted` - will be removed on save
//! - `Detached` - not tracked (never stored in the log)

mod errors;
mod record;
mod tracker;

pub use errors::{TrackingError, TrackingResult};
pub use record::{Document, FieldEntry, RecordKey, RecordState, TrackedRecord};
pub use tracker::ChangeTracker;
