// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-transaction operation log
//!
//! Writes are buffered here in issue order and handed to the durable store as
//! one batch at outermost commit. Savepoints capture a position in the log;
//! rolling back to a savepoint truncates the log to that position.

use crate::store::{RecordKey, Value, WriteOp};

/// Ordered buffer of a transaction's pending writes
#[derive(Debug, Clone)]
pub struct OperationLog {
    writes: Vec<WriteOp>,
    /// Memory usage estimate in bytes
    estimated_size_bytes: usize,
}

impl OperationLog {
    /// Create a new empty log
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            estimated_size_bytes: std::mem::size_of::<Self>(),
        }
    }

    /// Append a write
    pub fn record(&mut self, write: WriteOp) {
        self.estimated_size_bytes += estimate_write_size(&write);
        self.writes.push(write);
    }

    /// Position after the last recorded write
    pub fn position(&self) -> usize {
        self.writes.len()
    }

    /// Discard every write at or after `position`, returning how many were dropped
    pub fn truncate(&mut self, position: usize) -> usize {
        if position >= self.writes.len() {
            return 0;
        }
        let discarded: usize = self.writes[position..].iter().map(estimate_write_size).sum();
        let count = self.writes.len() - position;
        self.writes.truncate(position);
        self.estimated_size_bytes -= discarded;
        count
    }

    /// Latest buffered state of `key`
    ///
    /// `None` if the log never touched the key, `Some(None)` if its last
    /// operation was a delete.
    pub fn lookup(&self, key: &RecordKey) -> Option<Option<&Value>> {
        self.writes
            .iter()
            .rev()
            .find(|write| write.key() == key)
            .map(WriteOp::value)
    }

    /// Writes in issue order
    pub fn writes(&self) -> &[WriteOp] {
        &self.writes
    }

    /// Take all writes out of the log, leaving it empty
    pub fn take(&mut self) -> Vec<WriteOp> {
        self.estimated_size_bytes = std::mem::size_of::<Self>();
        std::mem::take(&mut self.writes)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Get statistics about the log
    pub fn stats(&self) -> OperationLogStats {
        OperationLogStats {
            operation_count: self.writes.len(),
            estimated_size_bytes: self.estimated_size_bytes,
        }
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about an operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationLogStats {
    pub operation_count: usize,
    pub estimated_size_bytes: usize,
}

fn estimate_write_size(write: &WriteOp) -> usize {
    std::mem::size_of::<WriteOp>()
        + write.key().as_str().len()
        + write.value().map(estimate_value_size).unwrap_or(0)
}

/// Estimate memory usage of a Value
fn estimate_value_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) => 8,
        Value::Text(s) => s.len(),
        Value::Bytes(bytes) => bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, n: i64) -> WriteOp {
        WriteOp::Put {
            key: key.into(),
            value: Value::Integer(n),
        }
    }

    #[test]
    fn test_log_creation() {
        let log = OperationLog::new();
        assert!(log.is_empty());
        assert_eq!(log.position(), 0);
        assert_eq!(
            log.stats().estimated_size_bytes,
            std::mem::size_of::<OperationLog>()
        );
    }

    #[test]
    fn test_truncate_restores_size_estimate() {
        let mut log = OperationLog::new();
        log.record(put("a", 1));
        let mark = log.position();
        let size_at_mark = log.stats().estimated_size_bytes;

        log.record(put("b", 2));
        log.record(WriteOp::Delete { key: "a".into() });
        assert_eq!(log.len(), 3);

        assert_eq!(log.truncate(mark), 2);
        assert_eq!(log.writes(), &[put("a", 1)]);
        assert_eq!(log.stats().estimated_size_bytes, size_at_mark);
        assert_eq!(log.truncate(mark), 0);
    }

    #[test]
    fn test_lookup_sees_latest_write() {
        let mut log = OperationLog::new();
        let a = RecordKey::from("a");

        assert_eq!(log.lookup(&a), None);
        log.record(put("a", 1));
        log.record(put("a", 2));
        assert_eq!(log.lookup(&a), Some(Some(&Value::Integer(2))));

        log.record(WriteOp::Delete { key: "a".into() });
        assert_eq!(log.lookup(&a), Some(None));
    }
}
