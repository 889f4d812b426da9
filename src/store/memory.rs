//! In-memory logical database
//!
//! Each `MemoryStore` plays the part of one independently connected
//! database. A batch written through `apply` is atomic: it is validated
//! against a working copy and only swapped in when every operation and
//! every constraint passes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use crate::session::{ConcurrencyConflictError, PersistenceError, SaveError};
use crate::tracking::{Document, RecordKey};

type Table = BTreeMap<String, StoredRow>;

/// A row as held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub document: Document,
    /// Concurrency token, bumped on every write
    pub version: u64,
}

/// One write of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        key: RecordKey,
        document: Document,
    },
    Update {
        key: RecordKey,
        expected_version: u64,
        changes: Document,
    },
    Delete {
        key: RecordKey,
        expected_version: u64,
    },
}

impl WriteOp {
    pub fn key(&self) -> &RecordKey {
        match self {
            Self::Insert { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    fn expected_version(&self) -> u64 {
        match self {
            Self::Insert { .. } => 0,
            Self::Update {
                expected_version, ..
            }
            | Self::Delete {
                expected_version, ..
            } => *expected_version,
        }
    }
}

/// Integrity rule checked on every batch touching its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Field must be present and non-null
    Required { table: String, field: String },
    /// Field value must not repeat within the table
    Unique { table: String, field: String },
}

impl Constraint {
    pub fn required(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Required {
            table: table.into(),
            field: field.into(),
        }
    }

    pub fn unique(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Unique {
            table: table.into(),
            field: field.into(),
        }
    }

    fn table(&self) -> &str {
        match self {
            Self::Required { table, .. } | Self::Unique { table, .. } => table,
        }
    }

    fn check(&self, rows: &Table) -> Result<(), PersistenceError> {
        match self {
            Self::Required { table, field } => {
                for (id, row) in rows {
                    if matches!(row.document.get(field), None | Some(Value::Null)) {
                        return Err(PersistenceError::constraint_violation(format!(
                            "{}/{}: required field '{}' is missing",
                            table, id, field
                        )));
                    }
                }
                Ok(())
            }
            Self::Unique { table, field } => {
                let mut seen: HashMap<String, &str> = HashMap::new();
                for (id, row) in rows {
                    let Some(value) = row.document.get(field) else {
                        continue;
                    };
                    if let Some(other) = seen.insert(value.to_string(), id) {
                        return Err(PersistenceError::constraint_violation(format!(
                            "{}: field '{}' value {} shared by '{}' and '{}'",
                            table, field, value, other, id
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Scripted failure returned by `apply` instead of writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Report a concurrency conflict on the first record of the batch
    Conflict,
    /// Report a constraint violation
    ConstraintViolation(String),
    /// Report the store as unavailable
    Unavailable(String),
}

impl StoreFault {
    fn into_error(self, batch: &[WriteOp]) -> SaveError {
        match self {
            Self::Conflict => {
                let (key, expected) = batch
                    .first()
                    .map(|op| (op.key().clone(), op.expected_version()))
                    .unwrap_or_else(|| (RecordKey::new("", ""), 0));
                ConcurrencyConflictError::new(key, expected, None).into()
            }
            Self::ConstraintViolation(message) => {
                PersistenceError::constraint_violation(message).into()
            }
            Self::Unavailable(message) => PersistenceError::store_unavailable(message).into(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<String, Table>,
    constraints: Vec<Constraint>,
    faults: HashMap<u64, StoreFault>,
    /// Number of `apply` calls so far, successful or not
    commits: u64,
    last_version: u64,
}

/// In-memory database shared by every session of one kind
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    io_delay: Duration,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            io_delay: Duration::ZERO,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Simulated latency applied before every batch
    pub fn with_io_delay(mut self, delay: Duration) -> Self {
        self.io_delay = delay;
        self
    }

    /// Add an integrity constraint
    pub fn with_constraint(self, constraint: Constraint) -> Self {
        self.lock().constraints.push(constraint);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the `ordinal`-th batch (1-based, counted over the store's
    /// lifetime) with the given fault instead of writing it
    pub fn fail_on_commit(&self, ordinal: u64, fault: StoreFault) {
        self.lock().faults.insert(ordinal, fault);
    }

    /// Fail the next batch with the given fault
    pub fn fail_next_commit(&self, fault: StoreFault) {
        let mut state = self.lock();
        let ordinal = state.commits + 1;
        state.faults.insert(ordinal, fault);
    }

    /// Number of batches submitted so far
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    pub fn get(&self, key: &RecordKey) -> Option<StoredRow> {
        self.lock()
            .tables
            .get(&key.table)
            .and_then(|table| table.get(&key.id))
            .cloned()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Every row of a table in id order
    pub fn rows(&self, table: &str) -> Vec<(String, StoredRow)> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, row)| (id.clone(), row.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Write a row directly, as another writer outside any session would.
    ///
    /// Returns the new version, or `None` if the row does not exist.
    pub fn external_update(&self, key: &RecordKey, field: &str, value: Value) -> Option<u64> {
        let mut state = self.lock();
        let version = state.last_version + 1;
        let row = state.tables.get_mut(&key.table)?.get_mut(&key.id)?;
        set_field(&mut row.document, field, value);
        row.version = version;
        state.last_version = version;
        Some(version)
    }

    pub(crate) async fn io_delay(&self) {
        if self.io_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.io_delay).await;
        }
    }

    /// Apply a batch atomically.
    ///
    /// Returns the new version of every inserted or updated row. On error
    /// nothing is written.
    pub fn apply(&self, batch: &[WriteOp]) -> Result<Vec<(RecordKey, u64)>, SaveError> {
        let mut state = self.lock();
        state.commits += 1;
        let ordinal = state.commits;
        if let Some(fault) = state.faults.remove(&ordinal) {
            return Err(fault.into_error(batch));
        }

        let mut tables = state.tables.clone();
        let mut version = state.last_version;
        let mut written = Vec::with_capacity(batch.len());

        for op in batch {
            let key = op.key();
            let table = tables.entry(key.table.clone()).or_default();
            match op {
                WriteOp::Insert { document, .. } => {
                    if table.contains_key(&key.id) {
                        return Err(PersistenceError::duplicate_key(key).into());
                    }
                    version += 1;
                    table.insert(
                        key.id.clone(),
                        StoredRow {
                            document: strip_nulls(document),
                            version,
                        },
                    );
                    written.push((key.clone(), version));
                }
                WriteOp::Update {
                    expected_version,
                    changes,
                    ..
                } => {
                    let row = checked_row(table, key, *expected_version)?;
                    for (field, value) in changes {
                        set_field(&mut row.document, field, value.clone());
                    }
                    version += 1;
                    row.version = version;
                    written.push((key.clone(), version));
                }
                WriteOp::Delete {
                    expected_version, ..
                } => {
                    checked_row(table, key, *expected_version)?;
                    table.remove(&key.id);
                }
            }
        }

        for constraint in &state.constraints {
            let touched = batch.iter().any(|op| op.key().table == constraint.table());
            if !touched {
                continue;
            }
            if let Some(rows) = tables.get(constraint.table()) {
                constraint.check(rows)?;
            }
        }

        state.tables = tables;
        state.last_version = version;
        Ok(written)
    }
}

fn checked_row<'a>(
    table: &'a mut Table,
    key: &RecordKey,
    expected: u64,
) -> Result<&'a mut StoredRow, ConcurrencyConflictError> {
    match table.get_mut(&key.id) {
        Some(row) if row.version == expected => Ok(row),
        Some(row) => Err(ConcurrencyConflictError::new(
            key.clone(),
            expected,
            Some(row.version),
        )),
        None => Err(ConcurrencyConflictError::new(key.clone(), expected, None)),
    }
}

/// Null is stored as an absent field
fn set_field(document: &mut Document, field: &str, value: Value) {
    if value.is_null() {
        document.remove(field);
    } else {
        document.insert(field.to_string(), value);
    }
}

fn strip_nulls(document: &Document) -> Document {
    document
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}
