// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction manager implementation
//!
//! The manager owns the lifecycle of every transaction. An outermost `begin`
//! on a context creates a transaction; further `begin` calls on the same
//! context open nested scopes backed by implicit savepoints on that
//! transaction. Only the outermost commit touches the durable store.
//!
//! Internal lock order is context registry, then transaction map, then
//! per-transaction state, with the lock table as a leaf. No manager lock is
//! held while a caller blocks waiting for a record lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::CoreConfig;
use crate::context::{ContextId, ContextRegistry, ScopeFrame, ScopeId, TransactionHandle};
use crate::error::{TxnError, TxnResult};
use crate::events::{
    run_commit_hooks, ObserverRegistry, TransactionEvent, TransactionObserver, TransactionOutcome,
};
use crate::lock::{LockError, LockMode, LockTable, LockWait};
use crate::store::{DurableStore, RecordKey, Value, WriteOp};

use super::savepoint::{SavepointHandle, SavepointMarker};
use super::state::{LockAcquisition, TransactionId, TransactionState, TransactionStatus};

/// Options for `begin_with`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeginOptions {
    /// Require this scope to be the outermost one on its context
    pub durable: bool,
}

impl BeginOptions {
    pub fn durable() -> Self {
        Self { durable: true }
    }
}

/// Snapshot of the manager's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStatistics {
    pub active_transactions: u64,
    pub begun_transactions: u64,
    pub committed_transactions: u64,
    pub aborted_transactions: u64,
    pub nested_scopes: u64,
    pub commit_failures: u64,
    pub deadlocks: u64,
    pub lock_timeouts: u64,
}

#[derive(Debug, Default)]
struct StatisticsCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    nested_scopes: AtomicU64,
    commit_failures: AtomicU64,
    deadlocks: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl StatisticsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transaction manager handles the lifecycle of all transactions
pub struct TransactionManager {
    store: Arc<dyn DurableStore>,
    lock_table: Arc<LockTable>,
    contexts: ContextRegistry,
    /// Map of open transactions by ID
    transactions: RwLock<HashMap<TransactionId, Arc<Mutex<TransactionState>>>>,
    observers: ObserverRegistry,
    config: CoreConfig,
    stats: StatisticsCounters,
}

impl TransactionManager {
    /// Create a manager over `store` with the default configuration
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_config(store, CoreConfig::default())
    }

    /// Create a manager over `store` with an explicit configuration
    pub fn with_config(store: Arc<dyn DurableStore>, config: CoreConfig) -> Self {
        Self {
            store,
            lock_table: Arc::new(LockTable::from_config(&config)),
            contexts: ContextRegistry::new(),
            transactions: RwLock::new(HashMap::new()),
            observers: ObserverRegistry::new(),
            config,
            stats: StatisticsCounters::default(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    /// Register an observer for outermost commits and aborts
    pub fn subscribe(&self, observer: impl TransactionObserver + 'static) {
        self.observers.subscribe(Arc::new(observer));
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open a scope on `ctx`
    ///
    /// Creates a new transaction if the context has none, otherwise a nested
    /// scope on the existing one.
    pub fn begin(&self, ctx: ContextId) -> TxnResult<TransactionHandle> {
        self.begin_with(ctx, BeginOptions::default())
    }

    /// Open a scope on `ctx` with options
    pub fn begin_with(&self, ctx: ContextId, options: BeginOptions) -> TxnResult<TransactionHandle> {
        if let Some(frame) = self.contexts.innermost(ctx) {
            return self.begin_nested(ctx, &frame, options);
        }

        let id = TransactionId::new();
        self.transactions
            .write()
            .insert(id, Arc::new(Mutex::new(TransactionState::new(id, ctx))));

        let handle = self.contexts.push(
            ctx,
            ScopeFrame {
                scope: ScopeId::next(),
                transaction: id,
                savepoint: None,
                rollback_only: false,
            },
        );
        StatisticsCounters::bump(&self.stats.begun);

        log::debug!(
            "Began {} on {}{}",
            id,
            ctx,
            if options.durable { " (durable)" } else { "" }
        );
        Ok(handle)
    }

    fn begin_nested(
        &self,
        ctx: ContextId,
        parent: &ScopeFrame,
        options: BeginOptions,
    ) -> TxnResult<TransactionHandle> {
        if options.durable {
            return Err(TxnError::NotOutermost {
                context: ctx,
                transaction: parent.transaction,
            });
        }

        let depth = self.contexts.depth(ctx);
        if depth >= self.config.max_nesting_depth {
            return Err(TxnError::NestingLimit {
                limit: self.config.max_nesting_depth,
            });
        }

        let scope = ScopeId::next();
        let savepoint = self.with_active(parent.transaction, |txn| {
            let marker = txn.marker();
            txn.savepoints
                .create(scope.to_string(), marker, scope, true)
        })?;

        let handle = self.contexts.push(
            ctx,
            ScopeFrame {
                scope,
                transaction: parent.transaction,
                savepoint: Some(savepoint),
                rollback_only: false,
            },
        );
        StatisticsCounters::bump(&self.stats.nested_scopes);

        log::debug!(
            "Entered nested {} of {} at depth {}",
            scope,
            parent.transaction,
            handle.depth()
        );
        Ok(handle)
    }

    /// Commit the scope named by `handle`, which must be the innermost scope
    /// of its context
    ///
    /// A nested commit only merges the scope into its parent. The outermost
    /// commit applies the buffered writes to the store in issue order, then
    /// releases every lock. If the store rejects the writes the transaction
    /// is rolled back and `CommitFailed` is returned.
    pub fn commit(&self, handle: &TransactionHandle) -> TxnResult<()> {
        let frame = self.contexts.check_innermost(handle)?;

        if frame.rollback_only {
            self.rollback(handle)?;
            return Err(TxnError::RollbackOnly {
                transaction: frame.transaction,
            });
        }

        match frame.savepoint {
            Some(savepoint) => {
                let released = self.with_active(frame.transaction, |txn| {
                    txn.savepoints.release_through(savepoint)
                })?;
                self.contexts.pop(handle.context(), handle.scope());
                log::debug!(
                    "Committed nested {} into {} ({} savepoint(s) released)",
                    handle.scope(),
                    frame.transaction,
                    released
                );
                Ok(())
            }
            None => self.commit_outermost(handle, frame.transaction),
        }
    }

    fn commit_outermost(&self, handle: &TransactionHandle, id: TransactionId) -> TxnResult<()> {
        let state = self.transaction_state(id)?;
        let mut txn = state.lock();
        txn.ensure_active()?;

        txn.status = TransactionStatus::Committing;
        let writes = txn.log.take();

        if let Err(source) = self.store.apply_writes(&writes) {
            txn.status = TransactionStatus::Aborting;
            Self::discard_pending(&mut txn);
            self.lock_table.release_all(id);
            txn.finish(TransactionStatus::Aborted);
            let event = Self::event(&txn, TransactionOutcome::Aborted, writes.len());
            drop(txn);

            self.retire(handle, id);
            StatisticsCounters::bump(&self.stats.commit_failures);
            StatisticsCounters::bump(&self.stats.aborted);

            log::warn!(
                "Commit of {} failed, rolled back {} write(s): {}",
                id,
                writes.len(),
                source
            );
            self.observers.notify(&event);
            return Err(TxnError::CommitFailed {
                transaction: id,
                source,
            });
        }

        let released = self.lock_table.release_all(id);
        txn.finish(TransactionStatus::Committed);
        txn.savepoints.clear();
        txn.locks.clear();
        let hooks = std::mem::take(&mut txn.commit_hooks);
        let event = Self::event(&txn, TransactionOutcome::Committed, writes.len());
        drop(txn);

        self.retire(handle, id);
        StatisticsCounters::bump(&self.stats.committed);

        log::debug!(
            "Committed {}: {} write(s) applied, {} lock(s) released in {:?}",
            id,
            writes.len(),
            released,
            event.duration
        );
        run_commit_hooks(id, hooks);
        self.observers.notify(&event);
        Ok(())
    }

    /// Roll back the scope named by `handle`, which must be the innermost
    /// scope of its context
    ///
    /// A nested rollback undoes only the work done since the scope began and
    /// leaves the parent active. The outermost rollback discards every
    /// buffered write and releases every lock.
    pub fn rollback(&self, handle: &TransactionHandle) -> TxnResult<()> {
        let frame = self.contexts.check_innermost(handle)?;

        match frame.savepoint {
            Some(savepoint) => {
                let discarded = self.with_active(frame.transaction, |txn| {
                    let target = txn.savepoints.rollback_to(savepoint)?;
                    Ok(self.undo_to(txn, target.marker))
                })?;
                self.contexts.pop(handle.context(), handle.scope());
                log::debug!(
                    "Rolled back nested {} of {} ({} write(s) discarded)",
                    handle.scope(),
                    frame.transaction,
                    discarded
                );
                Ok(())
            }
            None => self.rollback_outermost(handle, frame.transaction),
        }
    }

    fn rollback_outermost(&self, handle: &TransactionHandle, id: TransactionId) -> TxnResult<()> {
        let state = self.transaction_state(id)?;
        let mut txn = state.lock();
        txn.ensure_active()?;

        txn.status = TransactionStatus::Aborting;
        let discarded = Self::discard_pending(&mut txn);
        let released = self.lock_table.release_all(id);
        txn.finish(TransactionStatus::Aborted);
        let event = Self::event(&txn, TransactionOutcome::Aborted, discarded);
        drop(txn);

        self.retire(handle, id);
        StatisticsCounters::bump(&self.stats.aborted);

        log::debug!(
            "Rolled back {}: {} write(s) discarded, {} lock(s) released",
            id,
            discarded,
            released
        );
        self.observers.notify(&event);
        Ok(())
    }

    /// Innermost open scope of `ctx`
    pub fn current(&self, ctx: ContextId) -> Option<TransactionHandle> {
        self.contexts.current(ctx)
    }

    /// Number of open scopes on `ctx`
    pub fn depth(&self, ctx: ContextId) -> usize {
        self.contexts.depth(ctx)
    }

    /// Number of contexts with an open scope
    pub fn active_contexts(&self) -> usize {
        self.contexts.active_contexts()
    }

    pub fn in_transaction(&self, ctx: ContextId) -> bool {
        self.contexts.current(ctx).is_some()
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Buffer a write of `value` to `key` in the context's transaction
    pub fn write(
        &self,
        ctx: ContextId,
        key: impl Into<RecordKey>,
        value: impl Into<Value>,
    ) -> TxnResult<()> {
        let write = WriteOp::Put {
            key: key.into(),
            value: value.into(),
        };
        self.record(ctx, write)
    }

    /// Buffer a delete of `key` in the context's transaction
    pub fn delete(&self, ctx: ContextId, key: impl Into<RecordKey>) -> TxnResult<()> {
        self.record(ctx, WriteOp::Delete { key: key.into() })
    }

    fn record(&self, ctx: ContextId, write: WriteOp) -> TxnResult<()> {
        let frame = self.innermost_frame(ctx)?;
        self.with_active(frame.transaction, |txn| {
            txn.log.record(write);
            Ok(())
        })
    }

    /// Read `key` as the context sees it
    ///
    /// Inside a transaction the transaction's own buffered writes take
    /// precedence over the store. Outside one the store is read directly.
    pub fn read(&self, ctx: ContextId, key: impl Into<RecordKey>) -> TxnResult<Option<Value>> {
        let key = key.into();
        if let Some(frame) = self.contexts.innermost(ctx) {
            let buffered = self.with_active(frame.transaction, |txn| {
                Ok(txn.log.lookup(&key).map(|value| value.cloned()))
            })?;
            if let Some(value) = buffered {
                return Ok(value);
            }
        }
        Ok(self.store.read_record(&key)?)
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Lock `key` for the context's transaction, waiting up to the
    /// configured timeout
    pub fn acquire_lock(
        &self,
        ctx: ContextId,
        key: impl Into<RecordKey>,
        mode: LockMode,
    ) -> TxnResult<()> {
        self.acquire_lock_with(ctx, key, mode, LockWait::Default)
    }

    /// Lock `key` for the context's transaction with an explicit wait policy
    ///
    /// After `Deadlock` or `Timeout` the transaction stays active without the
    /// requested lock; the caller is expected to roll back and retry.
    pub fn acquire_lock_with(
        &self,
        ctx: ContextId,
        key: impl Into<RecordKey>,
        mode: LockMode,
        wait: LockWait,
    ) -> TxnResult<()> {
        let key = key.into();
        let frame = self.innermost_frame(ctx)?;
        let id = frame.transaction;
        let state = self.transaction_state(id)?;

        let previous = {
            let txn = state.lock();
            txn.ensure_active()?;
            self.lock_table.mode_held(id, &key)
        };
        if previous.is_some_and(|held| held.covers(mode)) {
            return Ok(());
        }

        if let Err(err) = self.lock_table.acquire_with(id, &key, mode, wait) {
            match err {
                LockError::Deadlock { .. } => StatisticsCounters::bump(&self.stats.deadlocks),
                LockError::Timeout { .. } => StatisticsCounters::bump(&self.stats.lock_timeouts),
                LockError::WouldBlock { .. } => {}
            }
            return Err(err.into());
        }

        let mut txn = state.lock();
        if let Err(err) = txn.ensure_active() {
            drop(txn);
            match previous {
                Some(prev) => self.lock_table.downgrade(id, &key, prev),
                None => self.lock_table.release(id, &key),
            };
            return Err(err);
        }
        txn.locks.push(LockAcquisition {
            key,
            mode,
            previous,
        });
        Ok(())
    }

    /// Lock `key` exclusively, then read it
    pub fn select_for_update(
        &self,
        ctx: ContextId,
        key: impl Into<RecordKey>,
    ) -> TxnResult<Option<Value>> {
        self.select_for_update_with(ctx, key, LockWait::Default)
    }

    /// Lock `key` exclusively with an explicit wait policy, then read it
    pub fn select_for_update_with(
        &self,
        ctx: ContextId,
        key: impl Into<RecordKey>,
        wait: LockWait,
    ) -> TxnResult<Option<Value>> {
        let key = key.into();
        self.acquire_lock_with(ctx, key.clone(), LockMode::Exclusive, wait)?;
        self.read(ctx, key)
    }

    // ------------------------------------------------------------------
    // Rollback-only marking and deferred hooks
    // ------------------------------------------------------------------

    /// Mark the innermost scope of `ctx` so that committing it rolls back
    pub fn set_rollback_only(&self, ctx: ContextId) -> TxnResult<()> {
        let handle = self.contexts.set_rollback_only(ctx)?;
        log::debug!(
            "Marked {} of {} rollback-only",
            handle.scope(),
            handle.transaction()
        );
        Ok(())
    }

    pub fn is_rollback_only(&self, ctx: ContextId) -> bool {
        self.contexts
            .innermost(ctx)
            .map(|frame| frame.rollback_only)
            .unwrap_or(false)
    }

    /// Run `hook` after the context's outermost commit
    ///
    /// The hook is dropped if the transaction aborts, or if the scope or
    /// savepoint it was registered in is rolled back. Outside a transaction
    /// it runs immediately.
    pub fn on_commit<F>(&self, ctx: ContextId, hook: F) -> TxnResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.contexts.innermost(ctx) {
            None => {
                hook();
                Ok(())
            }
            Some(frame) => self.with_active(frame.transaction, |txn| {
                txn.commit_hooks.push(Box::new(hook));
                Ok(())
            }),
        }
    }

    // ------------------------------------------------------------------
    // Savepoints
    // ------------------------------------------------------------------

    /// Create a named savepoint in the context's innermost scope
    pub fn savepoint(&self, ctx: ContextId, name: impl Into<String>) -> TxnResult<SavepointHandle> {
        let name = name.into();
        let frame = self.innermost_frame(ctx)?;
        let handle = self.with_active(frame.transaction, |txn| {
            let marker = txn.marker();
            let id = txn
                .savepoints
                .create(name.clone(), marker, frame.scope, false)?;
            Ok(SavepointHandle::new(ctx, txn.id, id, name))
        })?;
        log::debug!(
            "Created savepoint '{}' ({}) in {}",
            handle.name(),
            handle.id(),
            handle.transaction()
        );
        Ok(handle)
    }

    /// Release a savepoint, keeping its work
    ///
    /// Only the most recent unreleased savepoint may be released.
    pub fn release_savepoint(&self, handle: &SavepointHandle) -> TxnResult<()> {
        let frame = self.savepoint_frame(handle)?;
        let savepoint = self.with_active(frame.transaction, |txn| {
            Self::check_savepoint_scope(txn, handle, frame.scope)?;
            txn.savepoints.release(handle.id())
        })?;
        log::debug!(
            "Released savepoint '{}' of {} after {:?}",
            savepoint.name,
            handle.transaction(),
            savepoint.created_at.elapsed()
        );
        Ok(())
    }

    /// Undo everything done since the savepoint was created
    ///
    /// Discards later writes and commit hooks, releases locks acquired after
    /// the savepoint (upgrades are downgraded back), and consumes the
    /// savepoint together with every savepoint created after it.
    pub fn rollback_to_savepoint(&self, handle: &SavepointHandle) -> TxnResult<()> {
        let frame = self.savepoint_frame(handle)?;
        let discarded = self.with_active(frame.transaction, |txn| {
            Self::check_savepoint_scope(txn, handle, frame.scope)?;
            let target = txn.savepoints.rollback_to(handle.id())?;
            Ok(self.undo_to(txn, target.marker))
        })?;
        log::debug!(
            "Rolled back {} to savepoint '{}' ({} write(s) discarded)",
            handle.transaction(),
            handle.name(),
            discarded
        );
        Ok(())
    }

    fn savepoint_frame(&self, handle: &SavepointHandle) -> TxnResult<ScopeFrame> {
        let frame = self.innermost_frame(handle.context())?;
        if frame.transaction != handle.transaction() {
            return Err(TxnError::StateError {
                transaction: handle.transaction(),
                reason: format!(
                    "savepoint '{}' belongs to a transaction that has resolved",
                    handle.name()
                ),
            });
        }
        Ok(frame)
    }

    fn check_savepoint_scope(
        txn: &TransactionState,
        handle: &SavepointHandle,
        innermost: ScopeId,
    ) -> TxnResult<()> {
        let savepoint =
            txn.savepoints
                .get(handle.id())
                .ok_or_else(|| TxnError::SavepointNotFound {
                    savepoint: handle.name().to_string(),
                })?;
        if savepoint.scope != innermost {
            return Err(TxnError::NestingViolation {
                reason: format!(
                    "savepoint '{}' was created in {} but {} is innermost",
                    handle.name(),
                    savepoint.scope,
                    innermost
                ),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Status of an open transaction; `None` once it has resolved
    pub fn status(&self, id: TransactionId) -> Option<TransactionStatus> {
        let state = self.transactions.read().get(&id).cloned()?;
        let status = state.lock().status;
        Some(status)
    }

    /// IDs of every open transaction, in creation order
    pub fn active_transaction_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.transactions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Names of the caller-created savepoints of the context's transaction
    pub fn savepoint_names(&self, ctx: ContextId) -> Vec<String> {
        self.contexts
            .innermost(ctx)
            .and_then(|frame| self.transaction_state(frame.transaction).ok())
            .map(|state| state.lock().savepoints.explicit_names())
            .unwrap_or_default()
    }

    /// Number of writes buffered by the context's transaction
    pub fn pending_writes(&self, ctx: ContextId) -> usize {
        self.contexts
            .innermost(ctx)
            .and_then(|frame| self.transaction_state(frame.transaction).ok())
            .map(|state| state.lock().log.len())
            .unwrap_or(0)
    }

    pub fn statistics(&self) -> TransactionStatistics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TransactionStatistics {
            active_transactions: self.transactions.read().len() as u64,
            begun_transactions: load(&self.stats.begun),
            committed_transactions: load(&self.stats.committed),
            aborted_transactions: load(&self.stats.aborted),
            nested_scopes: load(&self.stats.nested_scopes),
            commit_failures: load(&self.stats.commit_failures),
            deadlocks: load(&self.stats.deadlocks),
            lock_timeouts: load(&self.stats.lock_timeouts),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn innermost_frame(&self, ctx: ContextId) -> TxnResult<ScopeFrame> {
        self.contexts
            .innermost(ctx)
            .ok_or(TxnError::NoActiveTransaction { context: ctx })
    }

    fn transaction_state(&self, id: TransactionId) -> TxnResult<Arc<Mutex<TransactionState>>> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TxnError::StateError {
                transaction: id,
                reason: "transaction is no longer open".to_string(),
            })
    }

    /// Run `f` on an Active transaction's state
    fn with_active<R>(
        &self,
        id: TransactionId,
        f: impl FnOnce(&mut TransactionState) -> TxnResult<R>,
    ) -> TxnResult<R> {
        let state = self.transaction_state(id)?;
        let mut txn = state.lock();
        txn.ensure_active()?;
        f(&mut txn)
    }

    /// Undo writes, hooks and lock acquisitions made after `marker`
    ///
    /// Returns the number of writes discarded.
    fn undo_to(&self, txn: &mut TransactionState, marker: SavepointMarker) -> usize {
        let discarded = txn.log.truncate(marker.operations);
        txn.commit_hooks.truncate(marker.hooks);

        let keep = marker.locks.min(txn.locks.len());
        let undone = txn.locks.split_off(keep);
        for acquisition in undone.iter().rev() {
            match acquisition.previous {
                Some(previous) => {
                    self.lock_table
                        .downgrade(txn.id, &acquisition.key, previous);
                }
                None => {
                    self.lock_table.release(txn.id, &acquisition.key);
                }
            }
        }
        if !undone.is_empty() {
            log::debug!("{} gave back {} lock acquisition(s)", txn.id, undone.len());
        }
        discarded
    }

    /// Drop everything pending on an aborting transaction; returns the
    /// number of buffered writes discarded
    fn discard_pending(txn: &mut TransactionState) -> usize {
        let discarded = txn.log.take().len();
        txn.savepoints.clear();
        txn.locks.clear();
        txn.commit_hooks.clear();
        discarded
    }

    /// Forget a resolved transaction and close its outermost scope
    fn retire(&self, handle: &TransactionHandle, id: TransactionId) {
        self.contexts.pop(handle.context(), handle.scope());
        self.transactions.write().remove(&id);
    }

    fn event(
        txn: &TransactionState,
        outcome: TransactionOutcome,
        writes: usize,
    ) -> TransactionEvent {
        TransactionEvent {
            transaction: txn.id,
            context: txn.context,
            outcome,
            writes,
            duration: txn.duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> (Arc<MemoryStore>, TransactionManager) {
        let store = Arc::new(MemoryStore::with_records([("acct:1", 100i64)]));
        let manager = TransactionManager::new(store.clone());
        (store, manager)
    }

    #[test]
    fn test_begin_commit_lifecycle() {
        let (store, manager) = manager();
        let ctx = ContextId::new();

        let handle = manager.begin(ctx).unwrap();
        assert!(handle.is_outermost());
        assert_eq!(manager.current(ctx), Some(handle));
        assert_eq!(
            manager.status(handle.transaction()),
            Some(TransactionStatus::Active)
        );

        manager.write(ctx, "acct:1", 90i64).unwrap();
        assert_eq!(store.get("acct:1"), Some(Value::Integer(100)));
        assert_eq!(
            manager.read(ctx, "acct:1").unwrap(),
            Some(Value::Integer(90))
        );

        manager.commit(&handle).unwrap();
        assert_eq!(store.get("acct:1"), Some(Value::Integer(90)));
        assert_eq!(manager.current(ctx), None);
        assert_eq!(manager.status(handle.transaction()), None);
        assert!(manager.active_transaction_ids().is_empty());
    }

    #[test]
    fn test_nested_scope_shares_transaction() {
        let (_, manager) = manager();
        let ctx = ContextId::new();

        let outer = manager.begin(ctx).unwrap();
        let inner = manager.begin(ctx).unwrap();
        assert_eq!(inner.transaction(), outer.transaction());
        assert_eq!(inner.depth(), 1);
        assert_eq!(manager.depth(ctx), 2);
        assert_eq!(manager.active_transaction_ids(), vec![outer.transaction()]);

        manager.commit(&inner).unwrap();
        manager.commit(&outer).unwrap();
        assert_eq!(manager.depth(ctx), 0);
    }

    #[test]
    fn test_resolved_handle_is_state_error() {
        let (_, manager) = manager();
        let ctx = ContextId::new();

        let handle = manager.begin(ctx).unwrap();
        manager.rollback(&handle).unwrap();
        assert!(matches!(
            manager.commit(&handle),
            Err(TxnError::StateError { .. })
        ));
        assert!(matches!(
            manager.rollback(&handle),
            Err(TxnError::StateError { .. })
        ));
    }

    #[test]
    fn test_operations_without_transaction() {
        let (_, manager) = manager();
        let ctx = ContextId::new();

        assert!(matches!(
            manager.write(ctx, "acct:1", 1i64),
            Err(TxnError::NoActiveTransaction { .. })
        ));
        assert!(matches!(
            manager.acquire_lock(ctx, "acct:1", LockMode::Shared),
            Err(TxnError::NoActiveTransaction { .. })
        ));
        assert_eq!(
            manager.read(ctx, "acct:1").unwrap(),
            Some(Value::Integer(100))
        );
    }

    #[test]
    fn test_delete_is_visible_to_own_reads() {
        let (store, manager) = manager();
        let ctx = ContextId::new();

        let handle = manager.begin(ctx).unwrap();
        manager.delete(ctx, "acct:1").unwrap();
        assert_eq!(manager.read(ctx, "acct:1").unwrap(), None);
        manager.commit(&handle).unwrap();
        assert_eq!(store.get("acct:1"), None);
    }

    #[test]
    fn test_statistics() {
        let (_, manager) = manager();
        let ctx = ContextId::new();

        let outer = manager.begin(ctx).unwrap();
        let inner = manager.begin(ctx).unwrap();
        manager.rollback(&inner).unwrap();
        manager.commit(&outer).unwrap();

        let handle = manager.begin(ctx).unwrap();
        manager.rollback(&handle).unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.begun_transactions, 2);
        assert_eq!(stats.committed_transactions, 1);
        assert_eq!(stats.aborted_transactions, 1);
        assert_eq!(stats.nested_scopes, 1);
        assert_eq!(stats.active_transactions, 0);
    }

    #[test]
    fn test_lock_reacquire_records_once() {
        let (_, manager) = manager();
        let ctx = ContextId::new();

        let handle = manager.begin(ctx).unwrap();
        manager
            .acquire_lock(ctx, "acct:1", LockMode::Exclusive)
            .unwrap();
        manager.acquire_lock(ctx, "acct:1", LockMode::Shared).unwrap();

        let held = manager.lock_table().locks_held(handle.transaction());
        assert_eq!(held, vec![(RecordKey::from("acct:1"), LockMode::Exclusive)]);

        manager.commit(&handle).unwrap();
        assert!(manager.lock_table().is_empty());
    }
}
