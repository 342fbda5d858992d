// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction outcome notifications
//!
//! Observers hear about every outermost commit and abort once the
//! transaction's locks have been released. Delivery is best effort: a
//! panicking observer is logged and skipped, and never affects the outcome.

use crate::context::ContextId;
use crate::txn::state::CommitHook;
use crate::txn::TransactionId;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// How a transaction resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOutcome {
    Committed,
    Aborted,
}

/// Notification sent after an outermost commit or abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    pub transaction: TransactionId,
    pub context: ContextId,
    pub outcome: TransactionOutcome,
    /// Writes applied (commit) or discarded (abort)
    pub writes: usize,
    pub duration: Duration,
}

/// Receiver of transaction outcome events
pub trait TransactionObserver: Send + Sync {
    fn on_event(&self, event: &TransactionEvent);
}

impl<F> TransactionObserver for F
where
    F: Fn(&TransactionEvent) + Send + Sync,
{
    fn on_event(&self, event: &TransactionEvent) {
        self(event)
    }
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn TransactionObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver `event` to every observer
    pub fn notify(&self, event: &TransactionEvent) {
        // Snapshot so observers may subscribe or call back into the manager
        let observers: Vec<_> = self.observers.read().iter().cloned().collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                log::warn!(
                    "Transaction observer panicked handling {:?} of {}",
                    event.outcome,
                    event.transaction
                );
            }
        }
    }
}

/// Run deferred commit hooks in registration order
pub(crate) fn run_commit_hooks(transaction: TransactionId, hooks: Vec<CommitHook>) {
    for (index, hook) in hooks.into_iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(hook)).is_err() {
            log::warn!("Commit hook #{} of {} panicked", index, transaction);
        }
    }
}
