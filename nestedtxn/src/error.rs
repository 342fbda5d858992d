// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for transaction operations

use crate::context::ContextId;
use crate::lock::LockError;
use crate::store::StoreError;
use crate::txn::TransactionId;
use thiserror::Error;

/// Errors that can occur while driving transactions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    #[error("Invalid transaction state for {transaction}: {reason}")]
    StateError {
        transaction: TransactionId,
        reason: String,
    },

    #[error("Nesting violation: {reason}")]
    NestingViolation { reason: String },

    #[error("Savepoint '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Savepoint '{savepoint}' cannot be released before '{top}'")]
    OrderViolation { savepoint: String, top: String },

    #[error("Savepoint not found: {savepoint}")]
    SavepointNotFound { savepoint: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Commit of {transaction} failed and was rolled back: {source}")]
    CommitFailed {
        transaction: TransactionId,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No active transaction in context {context}")]
    NoActiveTransaction { context: ContextId },

    #[error("A durable transaction must be outermost; {context} already has {transaction} open")]
    NotOutermost {
        context: ContextId,
        transaction: TransactionId,
    },

    #[error("Nesting depth limit of {limit} exceeded")]
    NestingLimit { limit: usize },

    #[error("{transaction} was marked rollback-only and has been rolled back")]
    RollbackOnly { transaction: TransactionId },
}

impl TxnError {
    /// Whether the error came from lock contention that a retry may resolve
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxnError::Lock(err) if err.is_retryable())
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, TxnError::Lock(LockError::Deadlock { .. }))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TxnError::Lock(LockError::Timeout { .. }))
    }
}

/// Result type for transaction operations
pub type TxnResult<T> = Result<T, TxnError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockMode;

    #[test]
    fn test_retryable_classification() {
        let deadlock = TxnError::from(LockError::Deadlock {
            transaction: TransactionId::from_u64(1),
            key: "a".into(),
            mode: LockMode::Exclusive,
        });
        assert!(deadlock.is_retryable());
        assert!(deadlock.is_deadlock());

        let would_block = TxnError::from(LockError::WouldBlock {
            transaction: TransactionId::from_u64(1),
            key: "a".into(),
            mode: LockMode::Shared,
        });
        assert!(!would_block.is_retryable());

        let store = TxnError::from(StoreError::Unavailable("down".into()));
        assert!(!store.is_retryable());
    }

    #[test]
    fn test_commit_failed_display_includes_cause() {
        let err = TxnError::CommitFailed {
            transaction: TransactionId::from_u64(3),
            source: StoreError::WriteRejected("disk full".into()),
        };
        let message = err.to_string();
        assert!(message.contains("txn_3"));
        assert!(message.contains("disk full"));
    }
}
