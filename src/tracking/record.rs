//! Tracked record types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name to value map stored for every record
pub type Document = BTreeMap<String, Value>;

/// Identity of a record inside one logical database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Table (or collection) name
    pub table: String,
    /// Primary key within the table
    pub id: String,
}

impl RecordKey {
    /// Create a new record key
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

/// Pending mutation state of a tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    /// Matches what the store holds
    Unchanged,
    /// Will be inserted on save
    Added,
    /// Flagged fields will be written on save
    Modified,
    /// Will be removed on save
    Deleted,
    /// Not tracked
    Detached,
}

impl RecordState {
    /// Returns true for states that produce a write on save
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    /// Returns the state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "Unchanged",
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
            Self::Detached => "Detached",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original and current value of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    /// Value as last loaded from (or accepted into) the store
    pub original: Value,
    /// Value the caller sees now
    pub current: Value,
    /// Whether the field will be written on save
    pub modified: bool,
}

impl FieldEntry {
    fn unchanged(value: Value) -> Self {
        Self {
            original: value.clone(),
            current: value,
            modified: false,
        }
    }
}

/// One entry of a session's mutation log
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRecord {
    key: RecordKey,
    state: RecordState,
    fields: BTreeMap<String, FieldEntry>,
    /// Concurrency token of the stored row (0 until first insert)
    version: u64,
    /// A save already removed the stored row
    removed: bool,
    /// The stored row must be inserted again on the next save
    restore: bool,
}

impl TrackedRecord {
    /// A record loaded from the store
    pub fn unchanged(key: RecordKey, document: Document, version: u64) -> Self {
        Self {
            key,
            state: RecordState::Unchanged,
            fields: document
                .into_iter()
                .map(|(name, value)| (name, FieldEntry::unchanged(value)))
                .collect(),
            version,
            removed: false,
            restore: false,
        }
    }

    /// A record created by the caller and not yet stored
    pub fn added(key: RecordKey, document: Document) -> Self {
        let mut record = Self::unchanged(key, document, 0);
        record.state = RecordState::Added;
        record
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record a save that wrote this row, clearing any pending restore
    pub fn mark_written(&mut self, version: u64) {
        self.version = version;
        self.restore = false;
    }

    /// Record a save that deleted this row from the store
    pub fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// True once a save has deleted the stored row
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// True if the next save must insert the row again
    pub fn needs_restore(&self) -> bool {
        self.restore
    }

    /// Queue the stored row for re-insertion with its original values.
    ///
    /// Only meaningful for a record whose row a save has removed.
    pub fn schedule_restore(&mut self) {
        self.restore = true;
    }

    /// Iterate over fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldEntry)> {
        self.fields.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Look up a single field
    pub fn field(&self, name: &str) -> Option<&FieldEntry> {
        self.fields.get(name)
    }

    /// Current value of a field, if the record has it
    pub fn current(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|entry| &entry.current)
    }

    /// Original value of a field, if the record has it
    pub fn original(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|entry| &entry.original)
    }

    /// Snapshot of every current value
    pub fn current_values(&self) -> Document {
        self.fields
            .iter()
            .map(|(name, entry)| (name.clone(), entry.current.clone()))
            .collect()
    }

    /// Snapshot of every original value
    pub fn original_values(&self) -> Document {
        self.fields
            .iter()
            .map(|(name, entry)| (name.clone(), entry.original.clone()))
            .collect()
    }

    /// Current values of flagged fields only
    pub fn modified_values(&self) -> Document {
        self.fields
            .iter()
            .filter(|(_, entry)| entry.modified)
            .map(|(name, entry)| (name.clone(), entry.current.clone()))
            .collect()
    }

    /// Names of flagged fields
    pub fn modified_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, entry)| entry.modified)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_field_modified(&self, name: &str) -> bool {
        self.fields.get(name).map(|entry| entry.modified).unwrap_or(false)
    }

    /// Plain write: changes the current value only.
    ///
    /// The change becomes pending once detection runs. Fields that did not
    /// exist before start with a `null` original.
    pub fn write(&mut self, name: &str, value: Value) {
        match self.fields.get_mut(name) {
            Some(entry) => entry.current = value,
            None => {
                self.fields.insert(
                    name.to_string(),
                    FieldEntry {
                        original: Value::Null,
                        current: value,
                        modified: false,
                    },
                );
            }
        }
    }

    /// Write through the entry API: the field is flagged immediately.
    pub fn set_modified_value(&mut self, name: &str, value: Value) {
        self.write(name, value);
        if let Some(entry) = self.fields.get_mut(name) {
            entry.modified = true;
        }
        if self.state == RecordState::Unchanged {
            self.state = RecordState::Modified;
        }
    }

    /// Flag every field whose current value differs from its original.
    ///
    /// Flags are only ever set here, never cleared. Returns true if the
    /// record now has at least one flagged field.
    pub fn detect(&mut self) -> bool {
        let mut any = false;
        for entry in self.fields.values_mut() {
            if entry.current != entry.original {
                entry.modified = true;
            }
            any |= entry.modified;
        }
        if any && self.state == RecordState::Unchanged {
            self.state = RecordState::Modified;
        }
        any
    }

    /// Copy the original value back over every flagged field.
    ///
    /// Fields stay flagged so the next save writes the originals. Returns the
    /// number of fields reverted.
    pub fn revert_modified(&mut self) -> usize {
        let mut reverted = 0;
        for entry in self.fields.values_mut().filter(|entry| entry.modified) {
            entry.current = entry.original.clone();
            reverted += 1;
        }
        reverted
    }

    /// Copy the original value back over every field, flagged or not
    pub fn restore_originals(&mut self) {
        for entry in self.fields.values_mut() {
            entry.current = entry.original.clone();
        }
    }

    /// Make the current values the new originals and clear every flag
    pub(crate) fn accept(&mut self) {
        for entry in self.fields.values_mut() {
            entry.original = entry.current.clone();
            entry.modified = false;
        }
        self.state = RecordState::Unchanged;
        self.removed = false;
        self.restore = false;
    }

    /// Force a state. `Detached` is handled by the tracker.
    pub(crate) fn force_state(&mut self, state: RecordState) {
        match state {
            RecordState::Unchanged => self.accept(),
            RecordState::Modified => {
                for entry in self.fields.values_mut() {
                    entry.modified = true;
                }
                self.state = RecordState::Modified;
            }
            other => self.state = other,
        }
    }
}
