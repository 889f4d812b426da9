//! Unit of work
//!
//! Emulated atomic commit across several persistence sessions.
//!
//! # Commit
//!
//! 1. Take the commit gate (one commit per unit of work at a time)
//! 2. Save each session with pending mutations, in creation order
//! 3. On the first failure, record it in the ledger and reverse every
//!    session saved earlier in the call
//! 4. On success, every session accepts its changes
//!
//! # Failure surfaced to the caller
//!
//! - The failing session's error, once the rollback succeeded
//! - `RollbackFailure` if any reversal failed; stores may disagree and the
//!   triggering failure is chained as its source

mod coordinator;
mod errors;
mod ledger;
mod reversal;
mod rollback;

pub use coordinator::UnitOfWork;
pub use errors::{CommitError, CommitResult, ReversalError, RollbackFailure};
pub use ledger::{CommitFailure, CommitLedger};
pub use reversal::{plan_reversal, reverse, ReversalSummary};
pub use rollback::{RollbackGroup, RollbackOutcome};
