// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Savepoint stack
//!
//! Each transaction owns an ordered stack of savepoints. A savepoint records
//! where the operation log, the lock-acquisition list and the commit-hook list
//! stood when it was created. Nested scopes are implicit savepoints on the same
//! stack, so explicit and implicit savepoints obey one ordering discipline:
//! only the top may be released, and rolling back to a savepoint discards it
//! together with everything above it.

use crate::context::{ContextId, ScopeId};
use crate::error::TxnError;
use crate::txn::TransactionId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_SAVEPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a savepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SavepointId(u64);

impl SavepointId {
    pub(crate) fn next() -> Self {
        SavepointId(NEXT_SAVEPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sp_{}", self.0)
    }
}

/// Caller-facing reference to an explicit savepoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavepointHandle {
    context: ContextId,
    transaction: TransactionId,
    id: SavepointId,
    name: String,
}

impl SavepointHandle {
    pub(crate) fn new(
        context: ContextId,
        transaction: TransactionId,
        id: SavepointId,
        name: String,
    ) -> Self {
        Self {
            context,
            transaction,
            id,
            name,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn id(&self) -> SavepointId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Positions captured when a savepoint is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavepointMarker {
    /// Length of the operation log
    pub operations: usize,
    /// Number of lock acquisitions recorded
    pub locks: usize,
    /// Number of queued commit hooks
    pub hooks: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Savepoint {
    pub id: SavepointId,
    pub name: String,
    pub marker: SavepointMarker,
    /// Innermost scope at creation time
    pub scope: ScopeId,
    /// Created by a nested begin rather than by the caller
    pub implicit: bool,
    pub created_at: Instant,
}

/// Ordered stack of unreleased savepoints
#[derive(Debug, Default)]
pub(crate) struct SavepointStack {
    savepoints: Vec<Savepoint>,
}

impl SavepointStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new savepoint
    pub fn create(
        &mut self,
        name: String,
        marker: SavepointMarker,
        scope: ScopeId,
        implicit: bool,
    ) -> Result<SavepointId, TxnError> {
        // Implicit names are generated per scope and live in their own namespace
        if !implicit
            && self
                .savepoints
                .iter()
                .any(|sp| !sp.implicit && sp.name == name)
        {
            return Err(TxnError::DuplicateName { name });
        }

        let id = SavepointId::next();
        self.savepoints.push(Savepoint {
            id,
            name,
            marker,
            scope,
            implicit,
            created_at: Instant::now(),
        });
        Ok(id)
    }

    /// Release the top savepoint; any other position is an ordering error
    pub fn release(&mut self, id: SavepointId) -> Result<Savepoint, TxnError> {
        let index = self.index_of(id)?;
        if index + 1 != self.savepoints.len() {
            let top = self
                .savepoints
                .last()
                .map(|sp| sp.name.clone())
                .unwrap_or_default();
            return Err(TxnError::OrderViolation {
                savepoint: self.savepoints[index].name.clone(),
                top,
            });
        }
        Ok(self.savepoints.remove(index))
    }

    /// Release `id` and every savepoint above it, returning how many were popped
    pub fn release_through(&mut self, id: SavepointId) -> Result<usize, TxnError> {
        let index = self.index_of(id)?;
        let released = self.savepoints.len() - index;
        self.savepoints.truncate(index);
        Ok(released)
    }

    /// Pop `id` and everything above it, returning the target savepoint
    pub fn rollback_to(&mut self, id: SavepointId) -> Result<Savepoint, TxnError> {
        let index = self.index_of(id)?;
        let mut popped = self.savepoints.split_off(index);
        Ok(popped.swap_remove(0))
    }

    pub fn get(&self, id: SavepointId) -> Option<&Savepoint> {
        self.savepoints.iter().find(|sp| sp.id == id)
    }

    /// Names of the unreleased caller-created savepoints, bottom to top
    pub fn explicit_names(&self) -> Vec<String> {
        self.savepoints
            .iter()
            .filter(|sp| !sp.implicit)
            .map(|sp| sp.name.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.savepoints.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.savepoints.is_empty()
    }

    pub fn clear(&mut self) {
        self.savepoints.clear();
    }

    fn index_of(&self, id: SavepointId) -> Result<usize, TxnError> {
        self.savepoints
            .iter()
            .position(|sp| sp.id == id)
            .ok_or_else(|| TxnError::SavepointNotFound {
                savepoint: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with(names: &[&str]) -> (SavepointStack, Vec<SavepointId>) {
        let mut stack = SavepointStack::new();
        let scope = ScopeId::next();
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let marker = SavepointMarker {
                    operations: i,
                    locks: i,
                    hooks: 0,
                };
                stack.create(name.to_string(), marker, scope, false).unwrap()
            })
            .collect();
        (stack, ids)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (mut stack, _) = stack_with(&["s1"]);
        let err = stack
            .create("s1".to_string(), SavepointMarker::default(), ScopeId::next(), false)
            .unwrap_err();
        assert!(matches!(err, TxnError::DuplicateName { name } if name == "s1"));
    }

    #[test]
    fn test_implicit_names_do_not_clash() {
        let (mut stack, _) = stack_with(&["scope_1"]);
        stack
            .create("scope_1".to_string(), SavepointMarker::default(), ScopeId::next(), true)
            .unwrap();
        assert_eq!(stack.explicit_names(), vec!["scope_1".to_string()]);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_release_only_top() {
        let (mut stack, ids) = stack_with(&["s1", "s2"]);

        let err = stack.release(ids[0]).unwrap_err();
        assert!(matches!(err, TxnError::OrderViolation { .. }));
        assert_eq!(stack.len(), 2);

        stack.release(ids[1]).unwrap();
        stack.release(ids[0]).unwrap();
        assert!(stack.is_empty());

        assert!(matches!(
            stack.release(ids[0]),
            Err(TxnError::SavepointNotFound { .. })
        ));
    }

    #[test]
    fn test_rollback_to_pops_target_and_above() {
        let (mut stack, ids) = stack_with(&["s1", "s2", "s3"]);

        let target = stack.rollback_to(ids[1]).unwrap();
        assert_eq!(target.name, "s2");
        assert_eq!(target.marker.operations, 1);
        assert_eq!(stack.explicit_names(), vec!["s1".to_string()]);

        // The name is free again once consumed
        stack
            .create("s2".to_string(), SavepointMarker::default(), ScopeId::next(), false)
            .unwrap();
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_release_through() {
        let (mut stack, ids) = stack_with(&["s1", "s2", "s3"]);
        assert_eq!(stack.release_through(ids[1]).unwrap(), 2);
        assert_eq!(stack.explicit_names(), vec!["s1".to_string()]);
        assert!(stack.get(ids[2]).is_none());
    }
}
