// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers for nestedtxn

use colored::Colorize;
use nestedtxn::{
    ContextId, CoreConfig, LockMode, MemoryStore, RecordKey, TransactionManager, TxnError, TxnResult,
    Value,
};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::output::{self, WorkloadSummary};

/// Attempts per transfer before the worker gives up
const MAX_ATTEMPTS: usize = 64;

/// Load the config file if given, then apply `NESTEDTXN_*` overrides
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig, Box<dyn Error>> {
    let base = match path {
        Some(path) => CoreConfig::from_file(path)
            .map_err(|e| format!("Failed to load config {:?}: {}", path, e))?,
        None => CoreConfig::default(),
    };
    Ok(base.apply_env()?)
}

/// Handle the scenario command
///
/// An inner scope's rollback undoes its own write but leaves the outer
/// scope's write and exclusive lock in place until the outermost commit.
pub fn handle_scenario(config: CoreConfig) -> Result<(), Box<dyn Error>> {
    println!("{}", "Nested rollback scenario".bold().green());
    println!();

    let store = Arc::new(MemoryStore::with_records([("acct:1", 100i64)]));
    let manager = TransactionManager::with_config(store.clone(), config);
    let ctx = ContextId::current_thread();

    let outer = manager.begin(ctx)?;
    output::step(1, "begin", format!("{} at depth {}", outer.transaction(), outer.depth()));

    let balance = manager.select_for_update(ctx, "acct:1")?;
    output::step(
        2,
        "acquire Exclusive on acct:1",
        format!("balance = {}", display_value(balance.as_ref())),
    );

    manager.write(ctx, "acct:1", 150i64)?;
    output::step(3, "write acct:1 = 150", "buffered, not yet durable");

    let inner = manager.begin(ctx)?;
    output::step(
        4,
        "begin (nested)",
        format!(
            "same transaction {}, depth {}",
            inner.transaction(),
            inner.depth()
        ),
    );

    manager.write(ctx, "acct:1", 200i64)?;
    let seen = manager.read(ctx, "acct:1")?;
    output::step(
        5,
        "write acct:1 = 200",
        format!("read inside scope = {}", display_value(seen.as_ref())),
    );

    manager.rollback(&inner)?;
    let seen = manager.read(ctx, "acct:1")?;
    let held = manager
        .lock_table()
        .mode_held(outer.transaction(), &RecordKey::from("acct:1"))
        .map(|mode| mode.to_string())
        .unwrap_or_else(|| "none".to_string());
    output::step(
        6,
        "rollback (nested)",
        format!(
            "read = {}, lock held = {}",
            display_value(seen.as_ref()),
            held
        ),
    );

    manager.commit(&outer)?;
    output::step(
        7,
        "commit (outer)",
        format!(
            "durable acct:1 = {}, locks held = {}",
            display_value(store.get("acct:1").as_ref()),
            manager.lock_table().locks_held(outer.transaction()).len()
        ),
    );

    println!();
    println!("{}", "Committed records".bold());
    print!("{}", output::records_table(&store.snapshot()));
    Ok(())
}

/// Parameters of the bank workload
#[derive(Debug, Clone, Copy)]
pub struct BankOptions {
    pub accounts: usize,
    pub threads: usize,
    pub transfers: usize,
    pub balance: i64,
    pub timeout_ms: Option<u64>,
    pub shuffle: bool,
}

#[derive(Debug, Default)]
struct WorkerReport {
    transfers: usize,
    skipped: usize,
    retries: usize,
}

/// Handle the bank command
///
/// Workers move random amounts between random pairs of accounts. Each
/// transfer locks both accounts with `select_for_update`; in `--shuffle` mode
/// the lock order is random, so deadlocks occur and are retried.
pub fn handle_bank(config: CoreConfig, options: BankOptions) -> Result<(), Box<dyn Error>> {
    if options.accounts < 2 {
        return Err("The bank workload needs at least 2 accounts".into());
    }

    let config = match options.timeout_ms {
        Some(ms) => config.with_lock_timeout(Some(Duration::from_millis(ms))),
        None => config,
    };
    config.validate()?;

    let records = (0..options.accounts).map(|i| (account(i), options.balance));
    let store = Arc::new(MemoryStore::with_records(records));
    let manager = Arc::new(TransactionManager::with_config(store.clone(), config));
    let expected_total = options.balance * options.accounts as i64;

    println!(
        "{} {} accounts, {} threads x {} transfers ({} lock order)",
        "Bank workload:".bold().green(),
        options.accounts,
        options.threads,
        options.transfers,
        if options.shuffle { "random" } else { "key" }
    );

    let started = Instant::now();
    let workers: Vec<_> = (0..options.threads)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || run_worker(&manager, options))
        })
        .collect();

    let mut summary = WorkloadSummary::default();
    for worker in workers {
        let report = worker.join().map_err(|_| "Worker thread panicked")??;
        summary.transfers += report.transfers;
        summary.skipped += report.skipped;
        summary.retries += report.retries;
    }
    summary.elapsed = started.elapsed();

    print!(
        "{}",
        output::statistics_table(&manager.statistics(), &summary)
    );

    let total: i64 = store
        .snapshot()
        .values()
        .filter_map(Value::as_integer)
        .sum();
    if total != expected_total {
        println!(
            "{}",
            format!("❌ Total balance {} != {}", total, expected_total).red()
        );
        return Err("Total balance not conserved".into());
    }

    println!(
        "{}",
        format!("✅ Total balance conserved: {}", total).green()
    );
    Ok(())
}

fn run_worker(manager: &TransactionManager, options: BankOptions) -> TxnResult<WorkerReport> {
    let ctx = ContextId::new();
    let mut report = WorkerReport::default();

    for _ in 0..options.transfers {
        let from = fastrand::usize(..options.accounts);
        let to = (from + 1 + fastrand::usize(..options.accounts - 1)) % options.accounts;
        let amount = fastrand::i64(1..=10);

        let (first, second) = if options.shuffle || from < to {
            (from, to)
        } else {
            (to, from)
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match transfer(manager, ctx, (first, second), from, to, amount) {
                Ok(true) => {
                    report.transfers += 1;
                    break;
                }
                Ok(false) => {
                    report.skipped += 1;
                    break;
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    log::debug!("Retrying transfer {} -> {}: {}", from, to, e);
                    report.retries += 1;
                    thread::sleep(Duration::from_micros(fastrand::u64(0..500)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(report)
}

/// Move `amount` between two accounts; `Ok(false)` when funds are short
fn transfer(
    manager: &TransactionManager,
    ctx: ContextId,
    lock_order: (usize, usize),
    from: usize,
    to: usize,
    amount: i64,
) -> TxnResult<bool> {
    manager.atomic(ctx, |scope| -> Result<bool, TxnError> {
        for index in [lock_order.0, lock_order.1] {
            scope.acquire_lock(account(index), LockMode::Exclusive)?;
        }

        let source = balance(scope.select_for_update(account(from))?);
        if source < amount {
            return Ok(false);
        }
        let target = balance(scope.select_for_update(account(to))?);

        scope.write(account(from), source - amount)?;
        scope.write(account(to), target + amount)?;
        Ok(true)
    })
}

fn account(index: usize) -> String {
    format!("acct:{}", index)
}

fn balance(value: Option<Value>) -> i64 {
    value.and_then(|v| v.as_integer()).unwrap_or(0)
}

fn display_value(value: Option<&Value>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NULL".to_string())
}
