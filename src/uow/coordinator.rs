//! Commit coordinator
//!
//! Commits every registered session in creation order. When a session
//! fails, the sessions that already committed during the same call are
//! reversed and the failure is surfaced. Only one commit runs at a time
//! per unit of work.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{CommitError, CommitResult, RollbackFailure};
use super::ledger::{CommitFailure, CommitLedger};
use super::rollback::RollbackGroup;
use crate::config::{ConfigError, UnitOfWorkConfig};
use crate::observability::{
    log_event, CoordinatorMetrics, Event, Logger, ObservationScope, Severity,
};
use crate::session::{
    DisposeReport, PersistenceSession, RegistryError, SaveError, SessionKind, SessionRegistry,
};

/// All-or-nothing commit across the sessions of one registry
pub struct UnitOfWork {
    id: Uuid,
    registry: SessionRegistry,
    /// Held for the whole commit loop and its rollback
    gate: Mutex<()>,
    ledger: CommitLedger,
    config: UnitOfWorkConfig,
    metrics: Arc<CoordinatorMetrics>,
    rollback: RollbackGroup,
}

impl UnitOfWork {
    /// Unit of work with the default configuration
    pub fn new(registry: SessionRegistry) -> Self {
        Self::assemble(registry, UnitOfWorkConfig::default())
    }

    /// Unit of work with an explicit configuration.
    ///
    /// `log_level` is validated but not applied; the logger is shared by
    /// the whole process, see [`UnitOfWorkConfig::init_logging`].
    pub fn with_config(
        registry: SessionRegistry,
        config: UnitOfWorkConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(registry, config))
    }

    fn assemble(registry: SessionRegistry, config: UnitOfWorkConfig) -> Self {
        let metrics = Arc::new(CoordinatorMetrics::new());
        let rollback = RollbackGroup::new(config.rollback_parallelism, Arc::clone(&metrics));
        Self {
            id: Uuid::new_v4(),
            registry,
            gate: Mutex::new(()),
            ledger: CommitLedger::new(),
            config,
            metrics,
            rollback,
        }
    }

    /// Instance id, carried on every commit log line
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    /// Open a session of kind `K`; it takes part in every later commit
    pub fn create_session<K: SessionKind>(&self) -> Result<Arc<K::Session>, RegistryError> {
        let session = self.registry.create_session::<K>()?;
        self.metrics.increment_sessions_created();
        Ok(session)
    }

    /// Every session, oldest first
    pub fn sessions(&self) -> Vec<Arc<dyn PersistenceSession>> {
        self.registry.list_sessions()
    }

    /// Cause of the most recent failed commit
    pub fn last_failure(&self) -> Option<CommitFailure> {
        self.ledger.last()
    }

    pub fn is_last_failure_conflict(&self) -> bool {
        self.ledger.is_last_conflict()
    }

    /// Commit every session's pending mutations.
    ///
    /// Returns `Ok(true)` once every session has committed and accepted its
    /// changes. On failure the sessions committed earlier in this call are
    /// reversed before the error is returned; if a reversal fails, the
    /// returned error is `CommitError::Rollback`.
    pub async fn commit(&self, cancel: &CancellationToken) -> CommitResult<bool> {
        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.metrics.increment_commits_cancelled();
                return Err(CommitError::Cancelled);
            }
            guard = self.gate.lock() => guard,
        };
        if self.registry.is_disposed() {
            return Err(CommitError::Disposed);
        }
        self.metrics.increment_commits_attempted();

        let sessions = self.registry.list_sessions();
        let uow = self.id.to_string();
        let count = sessions.len().to_string();
        let scope = ObservationScope::with_fields(
            "UOW_COMMIT",
            &[("sessions", count.as_str()), ("unit_of_work", uow.as_str())],
        );

        let mut committed = 0usize;
        for (index, session) in sessions.iter().enumerate() {
            match self.commit_session(session.as_ref(), cancel).await {
                Ok(true) => committed += 1,
                Ok(false) => {}
                Err(error) => {
                    let err = self.fail(&sessions, index, error, cancel).await;
                    if err.is_rollback_failure() {
                        scope.fail_fatal(&err.to_string());
                    } else {
                        scope.fail(&err.to_string());
                    }
                    return Err(err);
                }
            }
        }

        for session in &sessions {
            session.accept_all_changes();
        }
        let committed = committed.to_string();
        Logger::trace(
            Event::ChangesAccepted.as_str(),
            &[("sessions", count.as_str()), ("unit_of_work", uow.as_str())],
        );
        self.metrics.increment_commits_succeeded();
        scope.complete_with_fields(&[("committed", committed.as_str())]);
        Ok(true)
    }

    /// Save one session. `Ok(false)` means it had nothing pending.
    async fn commit_session(
        &self,
        session: &dyn PersistenceSession,
        cancel: &CancellationToken,
    ) -> Result<bool, SaveError> {
        if !session.auto_detect_changes() {
            session.detect_changes();
        }
        let id = session.id().to_string();
        if !session.has_changes() {
            self.metrics.increment_sessions_skipped();
            Logger::trace(
                Event::SessionSkipped.as_str(),
                &[("kind", session.kind()), ("session", id.as_str())],
            );
            return Ok(false);
        }
        if cancel.is_cancelled() {
            return Err(SaveError::Cancelled);
        }

        let writes = session.save_changes(cancel).await?;

        self.metrics.increment_sessions_saved();
        let writes = writes.to_string();
        Logger::trace(
            Event::SessionCommitted.as_str(),
            &[
                ("kind", session.kind()),
                ("session", id.as_str()),
                ("writes", writes.as_str()),
            ],
        );
        Ok(true)
    }

    /// Record the failure of `sessions[index]` and roll back the prefix
    async fn fail(
        &self,
        sessions: &[Arc<dyn PersistenceSession>],
        index: usize,
        error: SaveError,
        cancel: &CancellationToken,
    ) -> CommitError {
        let failing = &sessions[index];
        let failure = CommitFailure::at_session(failing.as_ref(), error.clone());
        self.ledger.record(failure.clone());
        self.metrics.increment_commits_failed();

        let id = failing.id().to_string();
        let reason = error.to_string();
        if error.is_conflict() {
            self.metrics.increment_conflicts();
            Logger::warn(
                Event::ConflictDetected.as_str(),
                &[("kind", failing.kind()), ("session", id.as_str())],
            );
        }
        Logger::error(
            Event::CommitFailed.as_str(),
            &[
                ("code", error.code()),
                ("kind", failing.kind()),
                ("reason", reason.as_str()),
                ("session", id.as_str()),
            ],
        );

        // A token that already fired would stop the sweep before it starts
        let sweep = if cancel.is_cancelled() {
            CancellationToken::new()
        } else {
            cancel.clone()
        };

        self.metrics.increment_rollbacks();
        match self.rollback.run(&sessions[..index], &sweep).await {
            Ok(_) => {
                self.metrics.increment_rollbacks_completed();
                if self.config.clear_failed_session {
                    failing.clear_tracking();
                    Logger::trace(
                        Event::FailedSessionCleared.as_str(),
                        &[("kind", failing.kind()), ("session", id.as_str())],
                    );
                }
                CommitError::from_save(failing.id(), failing.kind(), error)
            }
            Err(reversal) => {
                self.metrics.increment_rollback_failures();
                let reverting = reversal.session.to_string();
                let cause = reversal.reason.to_string();
                log_event(
                    Event::RollbackFailed,
                    Severity::Error,
                    &[
                        ("kind", reversal.kind.as_str()),
                        ("reason", cause.as_str()),
                        ("session", reverting.as_str()),
                        ("trigger_session", id.as_str()),
                    ],
                );
                RollbackFailure::new(reversal, failure).into()
            }
        }
    }

    /// Release every session once no commit is running.
    ///
    /// Later commits fail with `CommitError::Disposed`.
    pub async fn dispose(&self) -> DisposeReport {
        let _gate = self.gate.lock().await;
        let report = self.registry.dispose();
        self.metrics.add_dispose_failures(report.failed as u64);
        report
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("sessions", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}
