//! In-process persistence engine
//!
//! Sessions commit their pending mutations into a `MemoryStore`. The store
//! enforces optimistic concurrency through per-row versions, validates
//! integrity constraints, and can be scripted to fail specific commits.

mod memory;

pub use memory::{Constraint, MemoryStore, StoreFault, StoredRow, WriteOp};
