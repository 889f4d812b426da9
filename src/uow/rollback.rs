//! Rollback group
//!
//! Reverses a set of committed sessions. Sessions are partitioned by
//! identity: work within one partition runs in order, partitions run
//! concurrently up to a fixed cap. The first reversal error aborts the
//! sweep.

use std::sync::Arc;

use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::ReversalError;
use super::reversal::{reverse, ReversalSummary};
use crate::observability::{CoordinatorMetrics, Event, Logger};
use crate::session::{PersistenceSession, SaveError, SessionId};

/// Totals over one successful sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Sessions visited
    pub sessions: usize,
    /// Sessions that had something to reverse
    pub reverted: usize,
    /// Reversals whose save hit a swallowed conflict
    pub conflicts_swallowed: usize,
}

impl RollbackOutcome {
    fn absorb(&mut self, summary: &ReversalSummary) {
        self.sessions += 1;
        if !summary.is_noop() {
            self.reverted += 1;
        }
        if summary.conflict_swallowed {
            self.conflicts_swallowed += 1;
        }
    }

    fn merge(mut self, other: RollbackOutcome) -> Self {
        self.sessions += other.sessions;
        self.reverted += other.reverted;
        self.conflicts_swallowed += other.conflicts_swallowed;
        self
    }
}

type Partition = (SessionId, Vec<Arc<dyn PersistenceSession>>);

/// Bounded-parallel reversal of committed sessions
#[derive(Debug, Clone)]
pub struct RollbackGroup {
    parallelism: usize,
    metrics: Arc<CoordinatorMetrics>,
}

impl RollbackGroup {
    /// `parallelism` below one is treated as one
    pub fn new(parallelism: usize, metrics: Arc<CoordinatorMetrics>) -> Self {
        Self {
            parallelism: parallelism.max(1),
            metrics,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Group sessions by identity, keeping first-appearance order
    fn partition(sessions: &[Arc<dyn PersistenceSession>]) -> Vec<Partition> {
        let mut partitions: Vec<Partition> = Vec::new();
        for session in sessions {
            let id = session.id();
            match partitions.iter_mut().find(|(pid, _)| *pid == id) {
                Some((_, members)) => members.push(Arc::clone(session)),
                None => partitions.push((id, vec![Arc::clone(session)])),
            }
        }
        partitions
    }

    /// Reverse every session in `sessions`.
    ///
    /// Cancellation is checked before each reversal and at each save; a
    /// fired token fails the sweep like any other reversal error.
    pub async fn run(
        &self,
        sessions: &[Arc<dyn PersistenceSession>],
        cancel: &CancellationToken,
    ) -> Result<RollbackOutcome, ReversalError> {
        // built up front so the stream holds no higher-ranked closure and
        // the sweep stays spawnable
        let sweeps: Vec<_> = Self::partition(sessions)
            .into_iter()
            .map(|(_, members)| self.reverse_partition(members, cancel).boxed())
            .collect();

        stream::iter(sweeps)
            .buffer_unordered(self.parallelism)
            .try_fold(RollbackOutcome::default(), |total, outcome| async move {
                Ok(total.merge(outcome))
            })
            .await
    }

    async fn reverse_partition(
        &self,
        members: Vec<Arc<dyn PersistenceSession>>,
        cancel: &CancellationToken,
    ) -> Result<RollbackOutcome, ReversalError> {
        let mut outcome = RollbackOutcome::default();
        for session in members {
            let result = if cancel.is_cancelled() {
                Err(SaveError::Cancelled)
            } else {
                let force_detect = !session.auto_detect_changes();
                reverse(session.as_ref(), force_detect, cancel).await
            };

            let id = session.id().to_string();
            match result {
                Ok(summary) => {
                    if !summary.is_noop() {
                        self.metrics.increment_sessions_reverted();
                        let writes = summary.writes.to_string();
                        Logger::info(
                            Event::SessionReverted.as_str(),
                            &[
                                ("kind", session.kind()),
                                ("session", id.as_str()),
                                ("writes", writes.as_str()),
                            ],
                        );
                    }
                    if summary.conflict_swallowed {
                        self.metrics.increment_reversal_conflicts_swallowed();
                    }
                    outcome.absorb(&summary);
                }
                Err(reason) => {
                    return Err(ReversalError {
                        session: session.id(),
                        kind: session.kind().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(outcome)
    }
}
