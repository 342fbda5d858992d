// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! nestedtxn CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // -v wins over --log-level; RUST_LOG still applies when neither is given
    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("{} {}", "nestedtxn".bold().green(), nestedtxn::VERSION);
            println!("Nested transactions, savepoints and record locking");
            Ok(())
        }

        Commands::Scenario => cli::handle_scenario(config),

        Commands::Bank {
            accounts,
            threads,
            transfers,
            balance,
            timeout_ms,
            shuffle,
        } => cli::handle_bank(
            config,
            cli::BankOptions {
                accounts,
                threads,
                transfers,
                balance,
                timeout_ms,
                shuffle,
            },
        ),
    }
}
