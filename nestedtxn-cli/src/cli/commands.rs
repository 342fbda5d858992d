// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nestedtxn")]
#[command(about = "Nested transactions, savepoints and record locking", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// JSON configuration file; NESTEDTXN_* environment variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Walk through a nested rollback that keeps the outer lock and write
    Scenario,

    /// Run concurrent transfers between accounts and verify the total balance
    Bank {
        /// Number of accounts
        #[arg(short, long, default_value_t = 16)]
        accounts: usize,

        /// Number of worker threads
        #[arg(short, long, default_value_t = 4)]
        threads: usize,

        /// Transfers per worker thread
        #[arg(long, default_value_t = 1_000)]
        transfers: usize,

        /// Opening balance of every account
        #[arg(long, default_value_t = 1_000)]
        balance: i64,

        /// Lock wait timeout in milliseconds, overriding the configuration
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Lock accounts in random order instead of key order, provoking deadlocks
        #[arg(long)]
        shuffle: bool,
    },

    /// Show version information
    Version,
}
