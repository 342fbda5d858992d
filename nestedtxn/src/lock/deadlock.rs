// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Wait-for graph used to detect lock deadlocks

use crate::txn::TransactionId;
use std::collections::{HashMap, HashSet};

/// Directed graph: an edge `a -> b` means transaction `a` waits for `b`
#[derive(Debug, Default)]
pub(crate) struct WaitForGraph {
    edges: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `waiter`
    pub(crate) fn set_waits(&mut self, waiter: TransactionId, blockers: HashSet<TransactionId>) {
        if blockers.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, blockers);
        }
    }

    /// Drop the outgoing edges of `waiter`
    pub(crate) fn clear_waits(&mut self, waiter: TransactionId) {
        self.edges.remove(&waiter);
    }

    /// Remove a transaction entirely, both as waiter and as blocker
    pub(crate) fn remove_transaction(&mut self, txn: TransactionId) {
        self.edges.remove(&txn);
        self.edges.retain(|_, blockers| {
            blockers.remove(&txn);
            !blockers.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) fn waits_on(&self, waiter: TransactionId) -> Option<&HashSet<TransactionId>> {
        self.edges.get(&waiter)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Find a cycle that passes through `start`
    ///
    /// Returns the cycle as a path beginning and ending at `start`.
    pub(crate) fn find_cycle_through(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = vec![start];
        if self.dfs(start, start, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs(
        &self,
        node: TransactionId,
        target: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
    ) -> bool {
        let Some(blockers) = self.edges.get(&node) else {
            return false;
        };

        for &next in blockers {
            if next == target {
                path.push(next);
                return true;
            }
            if visited.insert(next) {
                path.push(next);
                if self.dfs(next, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}
