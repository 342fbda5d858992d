// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction state management
//!
//! This module defines the transaction identifier, lifecycle states and the
//! per-transaction bookkeeping the manager keeps while a transaction is open.

use super::log::OperationLog;
use super::savepoint::{SavepointMarker, SavepointStack};
use crate::context::ContextId;
use crate::error::TxnError;
use crate::lock::LockMode;
use crate::store::RecordKey;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
///
/// Identifiers increase monotonically for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate the next transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying ID value
    pub fn id(&self) -> u64 {
        self.0
    }

    /// Create TransactionId from u64
    pub fn from_u64(id: u64) -> Self {
        TransactionId(id)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Transaction is active and can perform operations
    Active,
    /// Outermost commit in progress: writes are being applied to the store
    Committing,
    /// Transaction has been committed successfully
    Committed,
    /// Rollback in progress
    Aborting,
    /// Transaction has been rolled back
    Aborted,
}

impl TransactionStatus {
    /// Whether the transaction has reached a final state
    pub fn is_resolved(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Aborting => "ABORTING",
            TransactionStatus::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// A lock the transaction obtained, with the mode it held before
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockAcquisition {
    pub key: RecordKey,
    pub mode: LockMode,
    /// `Some(Shared)` for an upgrade, `None` for a fresh lock
    pub previous: Option<LockMode>,
}

pub(crate) type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// Complete state of an open transaction
pub(crate) struct TransactionState {
    pub id: TransactionId,
    pub context: ContextId,
    pub status: TransactionStatus,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub log: OperationLog,
    pub savepoints: SavepointStack,
    /// Lock acquisitions in order, for partial release on rollback-to
    pub locks: Vec<LockAcquisition>,
    pub commit_hooks: Vec<CommitHook>,
}

impl TransactionState {
    pub fn new(id: TransactionId, context: ContextId) -> Self {
        Self {
            id,
            context,
            status: TransactionStatus::Active,
            start_time: Instant::now(),
            end_time: None,
            log: OperationLog::new(),
            savepoints: SavepointStack::new(),
            locks: Vec::new(),
            commit_hooks: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Fail with `StateError` unless the transaction is Active
    pub fn ensure_active(&self) -> Result<(), TxnError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TxnError::StateError {
                transaction: self.id,
                reason: format!("transaction is {}", self.status),
            })
        }
    }

    /// Current positions of the log, lock list and hook list
    pub fn marker(&self) -> SavepointMarker {
        SavepointMarker {
            operations: self.log.position(),
            locks: self.locks.len(),
            hooks: self.commit_hooks.len(),
        }
    }

    /// Move to a final state and stamp the end time
    pub fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        self.end_time = Some(Instant::now());
    }

    /// Get transaction duration
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }
}
