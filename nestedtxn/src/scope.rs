// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Scoped transaction guards
//!
//! [`Atomic`] ties one begin to exactly one commit or rollback:
//! - The scope automatically **rolls back** when dropped
//! - `commit()` must be called explicitly to keep its work
//! - Nested guards become nested scopes of the same transaction
//!
//! [`TransactionManager::atomic`] wraps a closure in a scope, committing on
//! `Ok` and rolling back on `Err` or panic.

use crate::context::{ContextId, TransactionHandle};
use crate::error::{TxnError, TxnResult};
use crate::lock::{LockMode, LockWait};
use crate::store::{RecordKey, Value};
use crate::txn::{BeginOptions, SavepointHandle, TransactionId, TransactionManager};

/// Behavior when a scope guard is dropped unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropBehavior {
    /// Roll the scope back (default)
    #[default]
    Rollback,
    /// Commit the scope; rolls back instead while unwinding from a panic
    Commit,
    /// Panic if the scope is dropped without explicit commit/rollback;
    /// rolls back instead while unwinding from a panic
    Panic,
    /// Do nothing; the scope stays open on its context
    Ignore,
}

/// An open scope that resolves itself on drop
pub struct Atomic<'m> {
    manager: &'m TransactionManager,
    handle: TransactionHandle,
    finished: bool,
    drop_behavior: DropBehavior,
}

impl<'m> Atomic<'m> {
    /// Begin a scope on `ctx`
    pub fn begin(manager: &'m TransactionManager, ctx: ContextId) -> TxnResult<Self> {
        Self::begin_with(manager, ctx, BeginOptions::default())
    }

    pub fn begin_with(
        manager: &'m TransactionManager,
        ctx: ContextId,
        options: BeginOptions,
    ) -> TxnResult<Self> {
        let handle = manager.begin_with(ctx, options)?;
        Ok(Self {
            manager,
            handle,
            finished: false,
            drop_behavior: DropBehavior::default(),
        })
    }

    /// Begin a nested scope on the same context
    pub fn nested(&self) -> TxnResult<Atomic<'m>> {
        Self::begin(self.manager, self.handle.context())
    }

    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    pub fn context(&self) -> ContextId {
        self.handle.context()
    }

    pub fn transaction(&self) -> TransactionId {
        self.handle.transaction()
    }

    pub fn manager(&self) -> &'m TransactionManager {
        self.manager
    }

    pub fn read(&self, key: impl Into<RecordKey>) -> TxnResult<Option<Value>> {
        self.manager.read(self.context(), key)
    }

    pub fn write(&self, key: impl Into<RecordKey>, value: impl Into<Value>) -> TxnResult<()> {
        self.manager.write(self.context(), key, value)
    }

    pub fn delete(&self, key: impl Into<RecordKey>) -> TxnResult<()> {
        self.manager.delete(self.context(), key)
    }

    pub fn acquire_lock(&self, key: impl Into<RecordKey>, mode: LockMode) -> TxnResult<()> {
        self.manager.acquire_lock(self.context(), key, mode)
    }

    pub fn acquire_lock_with(
        &self,
        key: impl Into<RecordKey>,
        mode: LockMode,
        wait: LockWait,
    ) -> TxnResult<()> {
        self.manager.acquire_lock_with(self.context(), key, mode, wait)
    }

    pub fn select_for_update(&self, key: impl Into<RecordKey>) -> TxnResult<Option<Value>> {
        self.manager.select_for_update(self.context(), key)
    }

    pub fn savepoint(&self, name: impl Into<String>) -> TxnResult<SavepointHandle> {
        self.manager.savepoint(self.context(), name)
    }

    pub fn release_savepoint(&self, savepoint: &SavepointHandle) -> TxnResult<()> {
        self.manager.release_savepoint(savepoint)
    }

    pub fn rollback_to_savepoint(&self, savepoint: &SavepointHandle) -> TxnResult<()> {
        self.manager.rollback_to_savepoint(savepoint)
    }

    pub fn on_commit<F>(&self, hook: F) -> TxnResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.manager.on_commit(self.context(), hook)
    }

    pub fn set_rollback_only(&self) -> TxnResult<()> {
        self.manager.set_rollback_only(self.context())
    }

    /// Set the behavior when this guard is dropped unresolved
    pub fn set_drop_behavior(&mut self, behavior: DropBehavior) {
        self.drop_behavior = behavior;
    }

    /// Commit the scope
    pub fn commit(mut self) -> TxnResult<()> {
        self.finished = true;
        self.manager.commit(&self.handle)
    }

    /// Roll the scope back
    pub fn rollback(mut self) -> TxnResult<()> {
        self.finished = true;
        self.manager.rollback(&self.handle)
    }
}

impl Drop for Atomic<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        // Unwinding out of a scope always rolls it back
        let behavior = match self.drop_behavior {
            DropBehavior::Commit | DropBehavior::Panic if std::thread::panicking() => {
                DropBehavior::Rollback
            }
            behavior => behavior,
        };

        match behavior {
            DropBehavior::Rollback => {
                if let Err(e) = self.manager.rollback(&self.handle) {
                    log::warn!("Failed to roll back {} on drop: {}", self.handle.scope(), e);
                }
            }
            DropBehavior::Commit => {
                if let Err(e) = self.manager.commit(&self.handle) {
                    log::warn!("Failed to commit {} on drop: {}", self.handle.scope(), e);
                }
            }
            DropBehavior::Panic => {
                panic!("Transaction scope dropped without explicit commit or rollback");
            }
            DropBehavior::Ignore => {}
        }
    }
}

impl TransactionManager {
    /// Run `f` inside a scope on `ctx`
    ///
    /// Commits when `f` returns `Ok`. When `f` returns `Err` the scope is
    /// rolled back and the closure's error is returned; a panic in `f` rolls
    /// the scope back while unwinding.
    pub fn atomic<T, E, F>(&self, ctx: ContextId, f: F) -> Result<T, E>
    where
        F: FnOnce(&Atomic<'_>) -> Result<T, E>,
        E: From<TxnError>,
    {
        let scope = Atomic::begin(self, ctx)?;
        match f(&scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                let scope_id = scope.handle().scope();
                if let Err(rollback_err) = scope.rollback() {
                    log::warn!(
                        "Failed to roll back {} after error: {}",
                        scope_id,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }
}
