// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Durable store boundary
//!
//! The transaction core never owns durable data. Writes are buffered per
//! transaction and handed to a [`DurableStore`] as one ordered batch when the
//! outermost scope commits. Reads go straight to the store, overlaid with the
//! reading transaction's own buffered writes.
//!
//! # Architecture
//!
//! ```text
//! TransactionManager (operation log per transaction)
//!     ↓  apply_writes(ordered batch) at outermost commit
//! DurableStore (trait)
//!     ↓
//! Concrete implementations (MemoryStore, or a caller-provided engine)
//! ```

mod memory;
mod types;

pub use memory::MemoryStore;
pub use types::{RecordKey, StoreError, Value, WriteOp};

/// Storage backend the transaction manager flushes into
///
/// Implementations must apply a batch atomically: either every write in
/// `writes` becomes visible, or none does and an error is returned.
pub trait DurableStore: Send + Sync {
    /// Apply an ordered batch of writes
    fn apply_writes(&self, writes: &[WriteOp]) -> Result<(), StoreError>;

    /// Read the committed value of a record
    fn read_record(&self, key: &RecordKey) -> Result<Option<Value>, StoreError>;
}
