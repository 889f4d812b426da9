//! Session over a `MemoryStore`
//!
//! Carries the per-entity convenience operations (add, find, set, remove)
//! and stamps audit fields when it saves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::errors::{PersistenceError, SaveError, SaveResult};
use super::registry::SessionFactory;
use super::session::{PersistenceSession, SessionId};
use crate::store::{MemoryStore, WriteOp};
use crate::tracking::{
    ChangeTracker, Document, RecordKey, RecordState, TrackingError, TrackingResult,
};

/// Names of the audit fields stamped on save. `None` disables a stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFields {
    /// Set once when a record is first inserted
    pub created: Option<String>,
    /// Set on every update
    pub updated: Option<String>,
}

impl Default for AuditFields {
    fn default() -> Self {
        Self {
            created: Some("created_at".to_string()),
            updated: Some("updated_at".to_string()),
        }
    }
}

impl AuditFields {
    /// No stamping at all
    pub fn disabled() -> Self {
        Self {
            created: None,
            updated: None,
        }
    }
}

/// Persistence session bound to one `MemoryStore`
pub struct StoreSession {
    id: SessionId,
    store: Arc<MemoryStore>,
    tracker: Mutex<ChangeTracker>,
    audit: AuditFields,
    disposed: AtomicBool,
}

impl StoreSession {
    pub fn new(id: SessionId, store: Arc<MemoryStore>) -> Self {
        Self::with_audit_fields(id, store, AuditFields::default())
    }

    pub fn with_audit_fields(id: SessionId, store: Arc<MemoryStore>, audit: AuditFields) -> Self {
        Self {
            id,
            store,
            tracker: Mutex::new(ChangeTracker::new()),
            audit,
            disposed: AtomicBool::new(false),
        }
    }

    /// Factory opening a new session over `store` for every request
    pub fn factory(store: Arc<MemoryStore>) -> impl SessionFactory<StoreSession> {
        move |id: SessionId| -> Result<Arc<StoreSession>, PersistenceError> {
            Ok(Arc::new(StoreSession::new(id, Arc::clone(&store))))
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> TrackingResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TrackingError::SessionDisposed);
        }
        Ok(())
    }

    pub fn set_auto_detect_changes(&self, enabled: bool) {
        self.tracker().set_auto_detect_changes(enabled);
    }

    /// Track a new record for insertion
    pub fn add(&self, table: &str, id: &str, document: Document) -> TrackingResult<RecordKey> {
        self.ensure_open()?;
        let key = RecordKey::new(table, id);
        self.tracker().track_added(key.clone(), document)?;
        Ok(key)
    }

    /// Current values of a record, loading it from the store if needed.
    ///
    /// Records pending deletion are not found.
    pub fn find(&self, table: &str, id: &str) -> Option<Document> {
        if self.ensure_open().is_err() {
            return None;
        }
        let key = RecordKey::new(table, id);
        let mut tracker = self.tracker();
        if let Some(record) = tracker.get(&key) {
            return match record.state() {
                RecordState::Deleted => None,
                _ => Some(record.current_values()),
            };
        }
        let row = self.store.get(&key)?;
        let record = tracker.attach(key, row.document, row.version);
        Some(record.current_values())
    }

    /// Write a field. The change is picked up by detection.
    pub fn set(&self, table: &str, id: &str, field: &str, value: Value) -> TrackingResult<()> {
        self.load(table, id)?;
        self.tracker().write(&RecordKey::new(table, id), field, value)
    }

    /// Mark a record for deletion
    pub fn remove(&self, table: &str, id: &str) -> TrackingResult<()> {
        self.load(table, id)?;
        self.tracker().mark_deleted(&RecordKey::new(table, id))
    }

    fn load(&self, table: &str, id: &str) -> TrackingResult<()> {
        self.ensure_open()?;
        let key = RecordKey::new(table, id);
        if self.tracker().get(&key).is_some() {
            return Ok(());
        }
        self.find(table, id)
            .map(|_| ())
            .ok_or(TrackingError::NotTracked(key))
    }

    /// State of a record in this session's log
    pub fn state_of(&self, table: &str, id: &str) -> RecordState {
        self.tracker().state_of(&RecordKey::new(table, id))
    }

    pub fn tracked_count(&self) -> usize {
        self.tracker().len()
    }

    /// Stamp audit fields on pending records.
    ///
    /// `updated` is skipped when already flagged, so a reverted record
    /// writes its original stamp back untouched.
    fn stamp_audit_fields(&self, tracker: &mut ChangeTracker) {
        let now = Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        for record in tracker.records_mut() {
            match record.state() {
                RecordState::Added => {
                    if let Some(field) = &self.audit.created {
                        if matches!(record.current(field), None | Some(Value::Null)) {
                            record.write(field, now.clone());
                        }
                    }
                }
                RecordState::Modified => {
                    if let Some(field) = &self.audit.updated {
                        if !record.is_field_modified(field) {
                            record.set_modified_value(field, now.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn build_batch(tracker: &ChangeTracker) -> Vec<WriteOp> {
        let mut batch = Vec::new();
        for record in tracker.pending() {
            let key = record.key().clone();
            match record.state() {
                RecordState::Added => batch.push(WriteOp::Insert {
                    key,
                    document: record.current_values(),
                }),
                RecordState::Modified => {
                    let changes = record.modified_values();
                    if !changes.is_empty() {
                        batch.push(WriteOp::Update {
                            key,
                            expected_version: record.version(),
                            changes,
                        });
                    }
                }
                RecordState::Deleted => batch.push(WriteOp::Delete {
                    key,
                    expected_version: record.version(),
                }),
                RecordState::Unchanged if record.needs_restore() => {
                    batch.push(WriteOp::Insert {
                        key,
                        document: record.current_values(),
                    })
                }
                RecordState::Unchanged | RecordState::Detached => {}
            }
        }
        batch
    }
}

impl PersistenceSession for StoreSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn kind(&self) -> &str {
        self.store.name()
    }

    fn auto_detect_changes(&self) -> bool {
        self.tracker().auto_detect_changes()
    }

    fn detect_changes(&self) {
        self.tracker().detect_changes();
    }

    fn has_changes(&self) -> bool {
        let mut tracker = self.tracker();
        if tracker.auto_detect_changes() {
            tracker.detect_changes();
        }
        tracker.has_changes()
    }

    fn with_tracker(&self, f: &mut dyn FnMut(&mut ChangeTracker)) {
        f(&mut self.tracker());
    }

    fn save_changes<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, SaveResult<usize>> {
        Box::pin(async move {
            if self.disposed.load(Ordering::Acquire) {
                return Err(PersistenceError::session_disposed(self.id).into());
            }

            let batch = {
                let mut tracker = self.tracker();
                if tracker.auto_detect_changes() {
                    tracker.detect_changes();
                }
                self.stamp_audit_fields(&mut tracker);
                Self::build_batch(&tracker)
            };
            if batch.is_empty() {
                return Ok(0);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SaveError::Cancelled),
                _ = self.store.io_delay() => {}
            }

            let written = self.store.apply(&batch)?;

            let mut tracker = self.tracker();
            for op in &batch {
                if let WriteOp::Delete { key, .. } = op {
                    if let Some(record) = tracker.get_mut(key) {
                        record.mark_removed();
                    }
                }
            }
            for (key, version) in written {
                if let Some(record) = tracker.get_mut(&key) {
                    record.mark_written(version);
                }
            }
            Ok(batch.len())
        })
    }

    fn dispose(&self) -> Result<(), PersistenceError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(PersistenceError::session_disposed(self.id));
        }
        self.tracker().clear();
        Ok(())
    }
}

impl std::fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("id", &self.id)
            .field("store", &self.store.name())
            .finish()
    }
}
