// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock table: holders, FIFO wait queues and blocking acquisition

use super::deadlock::WaitForGraph;
use super::{LockError, LockMode};
use crate::config::CoreConfig;
use crate::store::RecordKey;
use crate::txn::TransactionId;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// How long an acquisition may block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    /// Use the table's configured timeout
    #[default]
    Default,
    /// Wait until granted or deadlocked
    Block,
    /// Wait at most this long
    Timeout(Duration),
    /// Fail with `WouldBlock` instead of waiting
    NoWait,
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    transaction: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<TransactionId, LockMode>,
    queue: VecDeque<LockRequest>,
    /// Holders waiting to go from Shared to Exclusive. They bypass the queue.
    upgrading: HashSet<TransactionId>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty() && self.upgrading.is_empty()
    }

    fn queue_position(&self, txn: TransactionId) -> Option<usize> {
        self.queue.iter().position(|req| req.transaction == txn)
    }

    /// Transactions a request must wait for: conflicting holders, plus
    /// pending upgrades and conflicting requests queued ahead of it unless
    /// it is itself an upgrade.
    fn blockers(&self, txn: TransactionId, mode: LockMode) -> HashSet<TransactionId> {
        let mut blockers: HashSet<TransactionId> = self
            .holders
            .iter()
            .filter(|(holder, held)| **holder != txn && !held.is_compatible_with(mode))
            .map(|(holder, _)| *holder)
            .collect();

        if !self.holders.contains_key(&txn) {
            let ahead = self.queue_position(txn).unwrap_or(self.queue.len());
            blockers.extend(
                self.queue
                    .iter()
                    .take(ahead)
                    .filter(|req| !req.mode.is_compatible_with(mode))
                    .map(|req| req.transaction),
            );
            // A pending upgrade wants Exclusive, which conflicts with any new request
            blockers.extend(self.upgrading.iter().copied());
        }
        blockers
    }

    /// Register a pending request; returns true if it starts an upgrade
    fn enqueue(&mut self, txn: TransactionId, mode: LockMode) -> bool {
        if self.holders.contains_key(&txn) {
            return self.upgrading.insert(txn);
        }
        if self.queue_position(txn).is_none() {
            self.queue.push_back(LockRequest {
                transaction: txn,
                mode,
            });
        }
        false
    }

    /// Remove any pending request of `txn`; returns whether one existed
    fn dequeue(&mut self, txn: TransactionId) -> bool {
        let was_upgrading = self.upgrading.remove(&txn);
        match self.queue_position(txn) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => was_upgrading,
        }
    }
}

enum Attempt {
    Granted { was_waiting: bool },
    Blocked(HashSet<TransactionId>),
}

#[derive(Debug, Default)]
struct LockTableInner {
    entries: HashMap<RecordKey, LockEntry>,
    held: HashMap<TransactionId, HashSet<RecordKey>>,
    wait_for: WaitForGraph,
}

impl LockTableInner {
    fn try_grant(&mut self, txn: TransactionId, key: &RecordKey, mode: LockMode) -> Attempt {
        let entry = self.entries.entry(key.clone()).or_default();

        if entry.holders.get(&txn).is_some_and(|held| held.covers(mode)) {
            return Attempt::Granted { was_waiting: false };
        }

        let blockers = entry.blockers(txn, mode);
        if !blockers.is_empty() {
            return Attempt::Blocked(blockers);
        }

        let was_waiting = entry.dequeue(txn);
        entry.holders.insert(txn, mode);
        self.held.entry(txn).or_default().insert(key.clone());
        self.wait_for.clear_waits(txn);
        Attempt::Granted { was_waiting }
    }

    fn enqueue(&mut self, txn: TransactionId, key: &RecordKey, mode: LockMode) -> bool {
        self.entries.entry(key.clone()).or_default().enqueue(txn, mode)
    }

    /// Withdraw a pending request after deadlock or timeout
    fn abandon(&mut self, txn: TransactionId, key: &RecordKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.dequeue(txn);
        }
        self.wait_for.clear_waits(txn);
        self.drop_if_idle(key);
    }

    fn drop_if_idle(&mut self, key: &RecordKey) {
        if self.entries.get(key).is_some_and(LockEntry::is_idle) {
            self.entries.remove(key);
        }
    }

    fn remove_holder(&mut self, txn: TransactionId, key: &RecordKey) -> bool {
        let removed = match self.entries.get_mut(key) {
            Some(entry) => entry.holders.remove(&txn).is_some(),
            None => false,
        };
        self.drop_if_idle(key);
        removed
    }
}

/// Table of record locks shared by all transactions of a manager
pub struct LockTable {
    inner: Mutex<LockTableInner>,
    released: Condvar,
    default_timeout: Option<Duration>,
    deadlock_detection: bool,
}

impl LockTable {
    /// Create a lock table with the default configuration
    pub fn new() -> Self {
        Self::from_config(&CoreConfig::default())
    }

    /// Create a lock table using the lock settings of `config`
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::with_settings(config.lock_timeout(), config.deadlock_detection)
    }

    /// Create a lock table with an explicit default timeout (`None` waits
    /// forever) and deadlock detection switch
    pub fn with_settings(default_timeout: Option<Duration>, deadlock_detection: bool) -> Self {
        Self {
            inner: Mutex::new(LockTableInner::default()),
            released: Condvar::new(),
            default_timeout,
            deadlock_detection,
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Acquire `key` in `mode`, waiting up to the configured timeout
    pub fn acquire(
        &self,
        txn: TransactionId,
        key: &RecordKey,
        mode: LockMode,
    ) -> Result<(), LockError> {
        self.acquire_with(txn, key, mode, LockWait::Default)
    }

    /// Acquire `key` in `mode` with an explicit wait policy
    ///
    /// Requesting a mode already covered by the caller's lock succeeds
    /// immediately. A Shared holder requesting Exclusive is upgraded in place
    /// once it is the only holder.
    pub fn acquire_with(
        &self,
        txn: TransactionId,
        key: &RecordKey,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<(), LockError> {
        let started = Instant::now();
        let deadline = match wait {
            LockWait::Default => self.default_timeout.map(|d| started + d),
            LockWait::Block => None,
            LockWait::Timeout(d) => Some(started + d),
            LockWait::NoWait => Some(started),
        };

        let mut inner = self.inner.lock();
        let mut waiting = false;

        loop {
            let blockers = match inner.try_grant(txn, key, mode) {
                Attempt::Granted { was_waiting } => {
                    if was_waiting {
                        // Requests queued behind this one may now be grantable
                        self.released.notify_all();
                    }
                    if waiting {
                        debug!(
                            "{} granted {} lock on '{}' after {:?}",
                            txn,
                            mode,
                            key,
                            started.elapsed()
                        );
                    }
                    return Ok(());
                }
                Attempt::Blocked(blockers) => blockers,
            };

            if wait == LockWait::NoWait {
                inner.drop_if_idle(key);
                return Err(LockError::WouldBlock {
                    transaction: txn,
                    key: key.clone(),
                    mode,
                });
            }

            if !waiting {
                debug!(
                    "{} waiting for {} lock on '{}' (blocked by {})",
                    txn,
                    mode,
                    key,
                    format_ids(blockers.iter())
                );
                if inner.enqueue(txn, key, mode) {
                    // Queued waiters now also wait on the upgrader
                    self.released.notify_all();
                }
                waiting = true;
            }

            if self.deadlock_detection {
                inner.wait_for.set_waits(txn, blockers);
                if let Some(cycle) = inner.wait_for.find_cycle_through(txn) {
                    inner.abandon(txn, key);
                    self.released.notify_all();
                    warn!(
                        "Deadlock: {} requesting {} lock on '{}' closes cycle {}",
                        txn,
                        mode,
                        key,
                        format_ids(cycle.iter())
                    );
                    return Err(LockError::Deadlock {
                        transaction: txn,
                        key: key.clone(),
                        mode,
                    });
                }
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        inner.abandon(txn, key);
                        self.released.notify_all();
                        let waited = started.elapsed();
                        warn!(
                            "{} timed out after {:?} waiting for {} lock on '{}'",
                            txn, waited, mode, key
                        );
                        return Err(LockError::Timeout {
                            transaction: txn,
                            key: key.clone(),
                            mode,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    self.released.wait_until(&mut inner, deadline);
                }
                None => self.released.wait(&mut inner),
            }
        }
    }

    /// Release every lock held by `txn` and wake waiters
    ///
    /// Returns the number of keys released.
    pub(crate) fn release_all(&self, txn: TransactionId) -> usize {
        let mut inner = self.inner.lock();
        let keys = inner.held.remove(&txn).unwrap_or_default();
        for key in &keys {
            inner.remove_holder(txn, key);
        }
        inner.wait_for.remove_transaction(txn);
        drop(inner);

        if !keys.is_empty() {
            debug!("{} released {} lock(s)", txn, keys.len());
            self.released.notify_all();
        }
        keys.len()
    }

    /// Release a single lock of `txn`
    pub(crate) fn release(&self, txn: TransactionId, key: &RecordKey) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove_holder(txn, key);
        if removed {
            let now_empty = match inner.held.get_mut(&txn) {
                Some(keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.held.remove(&txn);
            }
            drop(inner);
            self.released.notify_all();
        }
        removed
    }

    /// Weaken the mode `txn` holds on `key`
    pub(crate) fn downgrade(&self, txn: TransactionId, key: &RecordKey, mode: LockMode) -> bool {
        let mut inner = self.inner.lock();
        let changed = match inner
            .entries
            .get_mut(key)
            .and_then(|entry| entry.holders.get_mut(&txn))
        {
            Some(held) if *held != mode => {
                *held = mode;
                true
            }
            _ => false,
        };
        drop(inner);

        if changed {
            self.released.notify_all();
        }
        changed
    }

    /// Current holders of `key`, sorted by transaction id
    pub fn holders(&self, key: &RecordKey) -> Vec<(TransactionId, LockMode)> {
        let inner = self.inner.lock();
        let mut holders: Vec<_> = inner
            .entries
            .get(key)
            .map(|entry| entry.holders.iter().map(|(t, m)| (*t, *m)).collect())
            .unwrap_or_default();
        holders.sort_by_key(|(txn, _)| txn.id());
        holders
    }

    /// Mode in which `txn` holds `key`, if any
    pub fn mode_held(&self, txn: TransactionId, key: &RecordKey) -> Option<LockMode> {
        self.inner
            .lock()
            .entries
            .get(key)
            .and_then(|entry| entry.holders.get(&txn).copied())
    }

    /// Number of requests currently blocked on `key`
    pub fn waiting_count(&self, key: &RecordKey) -> usize {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.queue.len() + entry.upgrading.len())
            .unwrap_or(0)
    }

    /// Every lock held by `txn`, sorted by key
    pub fn locks_held(&self, txn: TransactionId) -> Vec<(RecordKey, LockMode)> {
        let inner = self.inner.lock();
        let mut locks: Vec<_> = inner
            .held
            .get(&txn)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| {
                        inner
                            .entries
                            .get(key)
                            .and_then(|entry| entry.holders.get(&txn))
                            .map(|mode| (key.clone(), *mode))
                    })
                    .collect()
            })
            .unwrap_or_default();
        locks.sort_by(|a, b| a.0.cmp(&b.0));
        locks
    }

    /// Whether no key is locked or waited on
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.entries.is_empty() && inner.wait_for.is_empty()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

fn format_ids<'a>(ids: impl Iterator<Item = &'a TransactionId>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn key(k: &str) -> RecordKey {
        RecordKey::from(k)
    }

    fn wait_for_waiters(table: &LockTable, key: &RecordKey, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while table.waiting_count(key) < count {
            assert!(Instant::now() < deadline, "waiter never queued");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_shared_locks_coexist() {
        let table = LockTable::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();
        table.acquire(t2, &k, LockMode::Shared).unwrap();
        assert_eq!(table.holders(&k).len(), 2);
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let table = LockTable::new();
        let t1 = TransactionId::new();
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Exclusive).unwrap();
        table.acquire(t1, &k, LockMode::Exclusive).unwrap();
        table.acquire(t1, &k, LockMode::Shared).unwrap();
        assert_eq!(table.mode_held(t1, &k), Some(LockMode::Exclusive));
        assert_eq!(table.locks_held(t1).len(), 1);
    }

    #[test]
    fn test_upgrade_when_sole_holder() {
        let table = LockTable::new();
        let t1 = TransactionId::new();
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();
        table.acquire(t1, &k, LockMode::Exclusive).unwrap();
        assert_eq!(table.holders(&k), vec![(t1, LockMode::Exclusive)]);
    }

    #[test]
    fn test_no_wait_conflict() {
        let table = LockTable::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();
        let err = table
            .acquire_with(t2, &k, LockMode::Exclusive, LockWait::NoWait)
            .unwrap_err();
        assert!(matches!(err, LockError::WouldBlock { .. }));
        assert_eq!(table.waiting_count(&k), 0);
    }

    #[test]
    fn test_timeout_leaves_no_trace() {
        let table = LockTable::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Exclusive).unwrap();
        let err = table
            .acquire_with(t2, &k, LockMode::Shared, LockWait::Timeout(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(table.waiting_count(&k), 0);
        assert!(table.locks_held(t2).is_empty());

        assert_eq!(table.release_all(t1), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_all_wakes_waiter() {
        let table = Arc::new(LockTable::with_settings(None, true));
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Exclusive).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let table = Arc::clone(&table);
            let k = k.clone();
            thread::spawn(move || {
                table.acquire(t2, &k, LockMode::Exclusive).unwrap();
                tx.send(()).unwrap();
            })
        };

        wait_for_waiters(&table, &k, 1);
        assert!(rx.try_recv().is_err());

        table.release_all(t1);
        waiter.join().unwrap();
        rx.recv().unwrap();
        assert_eq!(table.holders(&k), vec![(t2, LockMode::Exclusive)]);
    }

    #[test]
    fn test_shared_request_waits_behind_queued_exclusive() {
        let table = Arc::new(LockTable::with_settings(None, true));
        let (t1, t2, t3) = (TransactionId::new(), TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();

        let writer = {
            let table = Arc::clone(&table);
            let k = k.clone();
            thread::spawn(move || table.acquire(t2, &k, LockMode::Exclusive))
        };
        wait_for_waiters(&table, &k, 1);

        // FIFO: a new reader may not overtake the queued writer
        let err = table
            .acquire_with(t3, &k, LockMode::Shared, LockWait::NoWait)
            .unwrap_err();
        assert!(matches!(err, LockError::WouldBlock { .. }));

        table.release_all(t1);
        writer.join().unwrap().unwrap();
        assert_eq!(table.mode_held(t2, &k), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_deadlock_fails_requester() {
        let table = Arc::new(LockTable::with_settings(None, true));
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let (a, b) = (key("a"), key("b"));

        table.acquire(t1, &a, LockMode::Exclusive).unwrap();
        table.acquire(t2, &b, LockMode::Exclusive).unwrap();

        let first = {
            let table = Arc::clone(&table);
            let b = b.clone();
            thread::spawn(move || table.acquire(t1, &b, LockMode::Exclusive))
        };
        wait_for_waiters(&table, &b, 1);

        let err = table.acquire(t2, &a, LockMode::Exclusive).unwrap_err();
        assert_eq!(
            err,
            LockError::Deadlock {
                transaction: t2,
                key: a.clone(),
                mode: LockMode::Exclusive,
            }
        );

        // The victim aborts; the first requester proceeds
        table.release_all(t2);
        first.join().unwrap().unwrap();
        assert_eq!(table.mode_held(t1, &b), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_upgrade_deadlock() {
        let table = Arc::new(LockTable::with_settings(None, true));
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();
        table.acquire(t2, &k, LockMode::Shared).unwrap();

        let first = {
            let table = Arc::clone(&table);
            let k = k.clone();
            thread::spawn(move || table.acquire(t1, &k, LockMode::Exclusive))
        };
        wait_for_waiters(&table, &k, 1);

        let err = table.acquire(t2, &k, LockMode::Exclusive).unwrap_err();
        assert!(matches!(err, LockError::Deadlock { transaction, .. } if transaction == t2));
        // The failed upgrade keeps its shared lock
        assert_eq!(table.mode_held(t2, &k), Some(LockMode::Shared));

        table.release_all(t2);
        first.join().unwrap().unwrap();
        assert_eq!(table.holders(&k), vec![(t1, LockMode::Exclusive)]);
    }

    #[test]
    fn test_pending_upgrade_blocks_new_readers() {
        let table = Arc::new(LockTable::with_settings(None, true));
        let (t1, t2, t3) = (TransactionId::new(), TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Shared).unwrap();
        table.acquire(t2, &k, LockMode::Shared).unwrap();

        let upgrader = {
            let table = Arc::clone(&table);
            let k = k.clone();
            thread::spawn(move || table.acquire(t1, &k, LockMode::Exclusive))
        };
        wait_for_waiters(&table, &k, 1);

        let err = table
            .acquire_with(t3, &k, LockMode::Shared, LockWait::NoWait)
            .unwrap_err();
        assert!(matches!(err, LockError::WouldBlock { .. }));
        assert_eq!(table.mode_held(t3, &k), None);

        table.release_all(t2);
        upgrader.join().unwrap().unwrap();
        assert_eq!(table.holders(&k), vec![(t1, LockMode::Exclusive)]);
    }

    #[test]
    fn test_release_and_downgrade() {
        let table = LockTable::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let k = key("acct:1");

        table.acquire(t1, &k, LockMode::Exclusive).unwrap();
        assert!(table.downgrade(t1, &k, LockMode::Shared));
        table
            .acquire_with(t2, &k, LockMode::Shared, LockWait::NoWait)
            .unwrap();

        assert!(table.release(t1, &k));
        assert!(!table.release(t1, &k));
        assert!(table.locks_held(t1).is_empty());
        assert_eq!(table.holders(&k), vec![(t2, LockMode::Shared)]);
    }
}
