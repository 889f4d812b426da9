//! Coordinator metrics
//!
//! - Counters only
//! - Monotonic increase for the lifetime of a coordinator
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one unit of work
///
/// Counters use Relaxed ordering; a snapshot taken while a commit runs may
/// mix before and after values.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    sessions_created: AtomicU64,
    commits_attempted: AtomicU64,
    commits_succeeded: AtomicU64,
    commits_failed: AtomicU64,
    commits_cancelled: AtomicU64,
    conflicts: AtomicU64,
    sessions_saved: AtomicU64,
    sessions_skipped: AtomicU64,
    rollbacks: AtomicU64,
    rollbacks_completed: AtomicU64,
    sessions_reverted: AtomicU64,
    reversal_conflicts_swallowed: AtomicU64,
    rollback_failures: AtomicU64,
    dispose_failures: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_sessions_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A commit call entered the gate
    pub fn increment_commits_attempted(&self) {
        self.commits_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits_succeeded(&self) {
        self.commits_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commits_failed(&self) {
        self.commits_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller gave up while waiting for the gate
    pub fn increment_commits_cancelled(&self) {
        self.commits_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_saved(&self) {
        self.sessions_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_skipped(&self) {
        self.sessions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A rollback sweep started
    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks_completed(&self) {
        self.rollbacks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_reverted(&self) {
        self.sessions_reverted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reversal_conflicts_swallowed(&self) {
        self.reversal_conflicts_swallowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollback_failures(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions that refused to dispose during teardown
    pub fn add_dispose_failures(&self, count: u64) {
        self.dispose_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            commits_attempted: self.commits_attempted.load(Ordering::Relaxed),
            commits_succeeded: self.commits_succeeded.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            commits_cancelled: self.commits_cancelled.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            sessions_saved: self.sessions_saved.load(Ordering::Relaxed),
            sessions_skipped: self.sessions_skipped.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollbacks_completed: self.rollbacks_completed.load(Ordering::Relaxed),
            sessions_reverted: self.sessions_reverted.load(Ordering::Relaxed),
            reversal_conflicts_swallowed: self
                .reversal_conflicts_swallowed
                .load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            dispose_failures: self.dispose_failures.load(Ordering::Relaxed),
        }
    }

    /// Current counters as a JSON object
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

/// A point-in-time snapshot of the coordinator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub commits_attempted: u64,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub commits_cancelled: u64,
    pub conflicts: u64,
    pub sessions_saved: u64,
    pub sessions_skipped: u64,
    pub rollbacks: u64,
    pub rollbacks_completed: u64,
    pub sessions_reverted: u64,
    pub reversal_conflicts_swallowed: u64,
    pub rollback_failures: u64,
    pub dispose_failures: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        // Plain integer fields cannot fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}
