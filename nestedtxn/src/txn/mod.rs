// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction management
//!
//! # Features
//! - Transaction lifecycle (begin, commit, rollback) per execution context
//! - Nested scopes implemented as implicit savepoints on the root transaction
//! - Named savepoints with strict stack ordering
//! - Buffered operation log applied to the durable store at outermost commit
//! - Strict two-phase record locking through the shared lock table

pub mod log;
pub mod manager;
pub mod savepoint;
pub(crate) mod state;

pub use log::{OperationLog, OperationLogStats};
pub use manager::{BeginOptions, TransactionManager, TransactionStatistics};
pub use savepoint::{SavepointHandle, SavepointId, SavepointMarker};
pub use state::{TransactionId, TransactionStatus};
