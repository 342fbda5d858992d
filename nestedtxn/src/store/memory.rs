// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory durable store for tests and the CLI

use super::types::{RecordKey, StoreError, Value, WriteOp};
use super::DurableStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-memory store applying each batch under a single write lock
pub struct MemoryStore {
    records: RwLock<HashMap<RecordKey, Value>>,
    batches_applied: AtomicU64,
    pending_failures: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            batches_applied: AtomicU64::new(0),
            pending_failures: AtomicUsize::new(0),
        }
    }

    /// Create a store pre-populated with records
    pub fn with_records<K, V, I>(records: I) -> Self
    where
        K: Into<RecordKey>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let store = Self::new();
        {
            let mut data = store.records.write();
            for (key, value) in records {
                data.insert(key.into(), value.into());
            }
        }
        store
    }

    /// Committed value of a record
    pub fn get(&self, key: impl Into<RecordKey>) -> Option<Value> {
        self.records.read().get(&key.into()).cloned()
    }

    /// Copy of every committed record
    pub fn snapshot(&self) -> HashMap<RecordKey, Value> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of batches successfully applied so far
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::SeqCst)
    }

    /// Make the next `apply_writes` call fail without applying anything
    pub fn fail_next_apply(&self) {
        self.pending_failures.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn apply_writes(&self, writes: &[WriteOp]) -> Result<(), StoreError> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::WriteRejected(format!(
                "injected failure for batch of {} write(s)",
                writes.len()
            )));
        }

        let mut records = self.records.write();
        for write in writes {
            match write {
                WriteOp::Put { key, value } => {
                    records.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    records.remove(key);
                }
            }
        }
        self.batches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_record(&self, key: &RecordKey) -> Result<Option<Value>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }
}
