// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Record-level pessimistic locking
//!
//! Locks are taken per [`RecordKey`] in [`LockMode::Shared`] or
//! [`LockMode::Exclusive`] mode and held until the owning transaction
//! resolves (strict two-phase locking). Rolling back to a savepoint is the one
//! exception: locks acquired after the savepoint are released again.
//!
//! Conflicting requests queue per key in FIFO order. Before a request blocks,
//! its wait-for edges are installed and checked for a cycle; a request that
//! would close a cycle fails immediately with [`LockError::Deadlock`].

mod deadlock;
mod table;

pub use table::{LockTable, LockWait};

use crate::store::RecordKey;
use crate::txn::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Read lock. Any number of transactions may hold it together.
    Shared,
    /// Write lock. Held by at most one transaction and excludes all others.
    Exclusive,
}

impl LockMode {
    /// Whether a lock held in `self` mode can coexist with one in `other` mode
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether holding `self` already satisfies a request for `requested`
    pub fn covers(&self, requested: LockMode) -> bool {
        *self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "SHARED"),
            LockMode::Exclusive => write!(f, "EXCLUSIVE"),
        }
    }
}

/// Lock acquisition failures
///
/// In every case the requester keeps the locks it already held and does not
/// obtain the requested one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Deadlock detected: {transaction} requesting {mode} lock on '{key}'")]
    Deadlock {
        transaction: TransactionId,
        key: RecordKey,
        mode: LockMode,
    },

    #[error("Lock wait timed out after {waited_ms}ms: {transaction} requesting {mode} lock on '{key}'")]
    Timeout {
        transaction: TransactionId,
        key: RecordKey,
        mode: LockMode,
        waited_ms: u64,
    },

    #[error("Lock not immediately available: {transaction} requesting {mode} lock on '{key}'")]
    WouldBlock {
        transaction: TransactionId,
        key: RecordKey,
        mode: LockMode,
    },
}

impl LockError {
    /// Whether retrying the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Deadlock { .. } | LockError::Timeout { .. })
    }

    pub fn transaction(&self) -> TransactionId {
        match self {
            LockError::Deadlock { transaction, .. }
            | LockError::Timeout { transaction, .. }
            | LockError::WouldBlock { transaction, .. } => *transaction,
        }
    }
}
