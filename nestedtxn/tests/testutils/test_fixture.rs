//! Test fixture for nestedtxn integration tests
//!
//! Every fixture owns its own store and manager, so tests never share lock or
//! transaction state.

use nestedtxn::{
    CoreConfig, DurableStore, MemoryStore, RecordKey, StoreError, TransactionManager, Value,
    WriteOp,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Initialize test logging once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Durable store that records each applied batch
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    batches: Mutex<Vec<Vec<WriteOp>>>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Batches successfully applied, in order
    pub fn batches(&self) -> Vec<Vec<WriteOp>> {
        self.batches.lock().clone()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }
}

impl DurableStore for RecordingStore {
    fn apply_writes(&self, writes: &[WriteOp]) -> Result<(), StoreError> {
        self.inner.apply_writes(writes)?;
        self.batches.lock().push(writes.to_vec());
        Ok(())
    }

    fn read_record(&self, key: &RecordKey) -> Result<Option<Value>, StoreError> {
        self.inner.read_record(key)
    }
}

/// Transaction manager over a recording in-memory store
pub struct TestFixture {
    store: Arc<RecordingStore>,
    manager: Arc<TransactionManager>,
}

impl TestFixture {
    /// Create an empty fixture with the default configuration
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self::build(MemoryStore::new(), config)
    }

    /// Create a fixture with `count` accounts `acct:1..=count`, each holding `balance`
    pub fn with_accounts(count: usize, balance: i64) -> Self {
        Self::with_accounts_and_config(count, balance, CoreConfig::default())
    }

    pub fn with_accounts_and_config(count: usize, balance: i64, config: CoreConfig) -> Self {
        let records = (1..=count).map(|i| (account(i), balance));
        Self::build(MemoryStore::with_records(records), config)
    }

    fn build(memory: MemoryStore, config: CoreConfig) -> Self {
        init_logging();
        let store = Arc::new(RecordingStore::new(memory));
        let manager = Arc::new(TransactionManager::with_config(store.clone(), config));
        Self { store, manager }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<RecordingStore> {
        &self.store
    }

    /// Committed integer value of `key`
    pub fn balance(&self, key: &str) -> Option<i64> {
        self.store.memory().get(key).and_then(|v| v.as_integer())
    }

    /// Sum of every committed integer record
    pub fn total(&self) -> i64 {
        self.store
            .memory()
            .snapshot()
            .values()
            .filter_map(Value::as_integer)
            .sum()
    }

    /// Block until `count` requests are waiting on `key`
    pub fn wait_for_waiters(&self, key: &str, count: usize) {
        let key = RecordKey::from(key);
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.manager.lock_table().waiting_count(&key) < count {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} waiter(s) on '{}'",
                count,
                key
            );
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Key of account `n`
pub fn account(n: usize) -> String {
    format!("acct:{}", n)
}
