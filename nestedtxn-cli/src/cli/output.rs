// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Table and step formatting for CLI output

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use nestedtxn::{RecordKey, TransactionStatistics, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Print one numbered scenario step and what it observed
pub fn step(number: usize, action: &str, observed: impl std::fmt::Display) {
    println!(
        "{} {}\n    {} {}",
        format!("[{}]", number).bold().cyan(),
        action,
        "→".dimmed(),
        observed
    );
}

/// Committed records, sorted by key
pub fn records_table(records: &HashMap<RecordKey, Value>) -> String {
    if records.is_empty() {
        return format!("{}\n", "No records".yellow());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Key").fg(Color::Green),
        Cell::new("Value").fg(Color::Green),
    ]);

    let mut keys: Vec<_> = records.keys().collect();
    keys.sort();
    for key in keys {
        table.add_row(vec![key.to_string(), records[key].to_string()]);
    }

    format!("{}\n", table)
}

/// Outcome counts reported by each workload
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkloadSummary {
    pub transfers: usize,
    pub skipped: usize,
    pub retries: usize,
    pub elapsed: Duration,
}

/// Manager statistics plus workload throughput
pub fn statistics_table(stats: &TransactionStatistics, summary: &WorkloadSummary) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Metric").fg(Color::Green),
        Cell::new("Value").fg(Color::Green),
    ]);

    let throughput = summary.transfers as f64 / summary.elapsed.as_secs_f64().max(f64::EPSILON);
    let rows: Vec<(&str, String)> = vec![
        ("Transfers", summary.transfers.to_string()),
        ("Skipped (insufficient funds)", summary.skipped.to_string()),
        ("Retries", summary.retries.to_string()),
        ("Elapsed", format!("{:?}", summary.elapsed)),
        ("Throughput", format!("{:.0} transfers/sec", throughput)),
        ("Transactions begun", stats.begun_transactions.to_string()),
        ("Committed", stats.committed_transactions.to_string()),
        ("Aborted", stats.aborted_transactions.to_string()),
        ("Deadlocks", stats.deadlocks.to_string()),
        ("Lock timeouts", stats.lock_timeouts.to_string()),
        ("Commit failures", stats.commit_failures.to_string()),
    ];

    for (metric, value) in rows {
        let cell = if metric == "Deadlocks" && stats.deadlocks > 0 {
            Cell::new(value).fg(Color::Yellow)
        } else {
            Cell::new(value)
        };
        table.add_row(vec![Cell::new(metric), cell]);
    }

    format!("{}\n", table)
}
