// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for nestedtxn
//!
//! Provides a guided walkthrough of nested scopes and savepoints, and a
//! concurrent transfer workload that exercises locking and deadlock handling.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_bank, handle_scenario, load_config, BankOptions};
