// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! nestedtxn - A nested transaction execution core
//!
//! nestedtxn groups mutating operations into atomic units, supports nested
//! scopes and named savepoints for partial rollback, and serializes concurrent
//! mutation of the same record through pessimistic record-level locks.
//!
//! # Features
//!
//! - **Nested Scopes**: Inner `begin` calls become implicit savepoints of the
//!   root transaction; only the outermost commit is durable
//! - **Savepoints**: Named checkpoints with strict stack ordering
//! - **Record Locking**: Shared/Exclusive locks, upgrades, FIFO waits, lock
//!   timeouts and wait-for-graph deadlock detection
//! - **Durable Store Boundary**: Writes are buffered and handed to a
//!   [`DurableStore`] as one ordered batch per outermost commit
//! - **Observers**: Best-effort notifications on commit and abort
//!
//! # Usage
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::with_records([("acct:1", 100i64)]));
//! let manager = TransactionManager::new(store);
//! let ctx = ContextId::current_thread();
//!
//! manager.atomic(ctx, |scope| -> TxnResult<()> {
//!     let balance = scope.select_for_update("acct:1")?;
//!     scope.write("acct:1", 90i64)?;
//!     Ok(())
//! })?;
//! ```

// Public modules
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod lock;
pub mod scope;
pub mod store;
pub mod txn;

pub use config::{ConfigError, CoreConfig};
pub use context::{ContextId, ScopeId, TransactionHandle};
pub use error::{TxnError, TxnResult};
pub use events::{TransactionEvent, TransactionObserver, TransactionOutcome};
pub use lock::{LockError, LockMode, LockTable, LockWait};
pub use scope::{Atomic, DropBehavior};
pub use store::{DurableStore, MemoryStore, RecordKey, StoreError, Value, WriteOp};
pub use txn::{
    BeginOptions, SavepointHandle, SavepointId, TransactionId, TransactionManager,
    TransactionStatistics, TransactionStatus,
};

/// nestedtxn version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// nestedtxn crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
