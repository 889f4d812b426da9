//! Per-session mutation log

use std::collections::BTreeMap;

use serde_json::Value;

use super::errors::{TrackingError, TrackingResult};
use super::record::{Document, RecordKey, RecordState, TrackedRecord};

/// Mutation log owned by one persistence session.
///
/// A record never holds two pending states at once: every transition
/// replaces the previous state, and `Detached` removes the entry.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    records: BTreeMap<RecordKey, TrackedRecord>,
    auto_detect_changes: bool,
}

impl ChangeTracker {
    /// Create an empty tracker with automatic change detection enabled
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            auto_detect_changes: true,
        }
    }

    pub fn auto_detect_changes(&self) -> bool {
        self.auto_detect_changes
    }

    pub fn set_auto_detect_changes(&mut self, enabled: bool) {
        self.auto_detect_changes = enabled;
    }

    /// Track a new record for insertion
    pub fn track_added(&mut self, key: RecordKey, document: Document) -> TrackingResult<()> {
        if self.records.contains_key(&key) {
            return Err(TrackingError::AlreadyTracked(key));
        }
        self.records
            .insert(key.clone(), TrackedRecord::added(key, document));
        Ok(())
    }

    /// Track a record loaded from the store.
    ///
    /// An already tracked record is left as-is; the tracked copy wins.
    pub fn attach(&mut self, key: RecordKey, document: Document, version: u64) -> &TrackedRecord {
        self.records
            .entry(key.clone())
            .or_insert_with(|| TrackedRecord::unchanged(key, document, version))
    }

    pub fn get(&self, key: &RecordKey) -> Option<&TrackedRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &RecordKey) -> Option<&mut TrackedRecord> {
        self.records.get_mut(key)
    }

    /// State of a record; untracked records are `Detached`
    pub fn state_of(&self, key: &RecordKey) -> RecordState {
        self.records
            .get(key)
            .map(|record| record.state())
            .unwrap_or(RecordState::Detached)
    }

    /// Plain write to a tracked record
    pub fn write(&mut self, key: &RecordKey, field: &str, value: Value) -> TrackingResult<()> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| TrackingError::NotTracked(key.clone()))?;
        if record.state() == RecordState::Deleted {
            return Err(TrackingError::RecordDeleted(key.clone()));
        }
        record.write(field, value);
        Ok(())
    }

    /// Mark a record for deletion. A record that was only ever added is
    /// simply forgotten.
    pub fn mark_deleted(&mut self, key: &RecordKey) -> TrackingResult<()> {
        let state = self.state_of(key);
        match state {
            RecordState::Detached => Err(TrackingError::NotTracked(key.clone())),
            RecordState::Added => {
                self.records.remove(key);
                Ok(())
            }
            _ => {
                self.set_state(key, RecordState::Deleted)?;
                Ok(())
            }
        }
    }

    /// Explicit state transition.
    ///
    /// - `Unchanged`: current values become the originals, flags cleared
    /// - `Modified`: every field flagged
    /// - `Detached`: the record leaves the log
    pub fn set_state(&mut self, key: &RecordKey, state: RecordState) -> TrackingResult<()> {
        if state == RecordState::Detached {
            return self
                .records
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| TrackingError::NotTracked(key.clone()));
        }
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| TrackingError::NotTracked(key.clone()))?;
        record.force_state(state);
        Ok(())
    }

    /// Flag every field whose value drifted from its original
    pub fn detect_changes(&mut self) {
        for record in self.records.values_mut() {
            if matches!(
                record.state(),
                RecordState::Unchanged | RecordState::Modified
            ) {
                record.detect();
            }
        }
    }

    /// True if any record is `Added`, `Modified` or `Deleted`, or waits
    /// to be re-inserted
    pub fn has_changes(&self) -> bool {
        self.records.values().any(writes_on_save)
    }

    /// Records that will produce a write on the next save
    pub fn pending(&self) -> impl Iterator<Item = &TrackedRecord> {
        self.records.values().filter(|record| writes_on_save(record))
    }

    pub fn records(&self) -> impl Iterator<Item = &TrackedRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut TrackedRecord> {
        self.records.values_mut()
    }

    /// Keys of every tracked record, in key order
    pub fn keys(&self) -> Vec<RecordKey> {
        self.records.keys().cloned().collect()
    }

    /// Treat everything pending as stored: `Added`/`Modified` become
    /// `Unchanged`, `Deleted` records leave the log.
    pub fn accept_all_changes(&mut self) {
        self.records
            .retain(|_, record| record.state() != RecordState::Deleted);
        for record in self.records.values_mut() {
            record.accept();
        }
    }

    /// Forget every tracked record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn writes_on_save(record: &TrackedRecord) -> bool {
    record.state().is_pending() || record.needs_restore()
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}
