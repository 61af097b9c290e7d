//! Stress workloads for rowtx.
//!
//! Threads move money between accounts concurrently. Every transfer reads
//! both balances and writes both back, so lost updates or partial commits
//! show up as a changed total.

use crate::fixtures::{create_accounts_table, seed_accounts, total_balance};
use rowtx_core::{
    Config, CoreError, CoreResult, Database, IsolationMode, Row, StatsSnapshot, TableId, Txn,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transfers per thread.
    pub transfers: usize,
    /// Number of accounts.
    pub accounts: usize,
    /// Starting balance of every account.
    pub initial_balance: i64,
    /// Isolation mode of every transfer.
    pub mode: IsolationMode,
    /// Retries per transfer after deadlocks, timeouts and write conflicts.
    pub max_retries: u32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transfers: 250,
            accounts: 16,
            initial_balance: 1_000,
            mode: IsolationMode::Locking,
            max_retries: 100,
        }
    }
}

/// Outcome of [`run_transfer_workload`].
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// Isolation mode of the transfers.
    pub mode: IsolationMode,
    /// Committed and failed transfers.
    pub result: StressTestResult,
    /// Sum of balances before the run.
    pub expected_total: i64,
    /// Sum of balances after the run.
    pub actual_total: i64,
    /// Database counters after the run.
    pub stats: StatsSnapshot,
}

impl TransferReport {
    /// Returns true if no money was created or destroyed.
    #[must_use]
    pub fn balance_preserved(&self) -> bool {
        self.expected_total == self.actual_total
    }
}

/// Moves `amount` from one account to another inside `txn`.
///
/// Rows are locked in argument order, so opposite transfers can deadlock.
/// Overdrafts fail the `amount >= 0` check and abort the transfer.
pub fn transfer(txn: &Txn<'_>, table: TableId, from: i64, to: i64, amount: i64) -> CoreResult<()> {
    let source = txn
        .read_for_update(table, from)?
        .ok_or_else(|| CoreError::invalid_operation(format!("no account {from}")))?;
    let target = txn
        .read_for_update(table, to)?
        .ok_or_else(|| CoreError::invalid_operation(format!("no account {to}")))?;

    let source_balance = source.get("amount").as_integer().unwrap_or(0);
    let target_balance = target.get("amount").as_integer().unwrap_or(0);
    txn.update(table, from, Row::new().with("amount", source_balance - amount))?;
    txn.update(table, to, Row::new().with("amount", target_balance + amount))?;
    Ok(())
}

/// Runs concurrent transfers against an existing `accounts` table.
pub fn stress_transfers(db: Arc<Database>, table: TableId, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let accounts = config.accounts.max(2);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let transfers = config.transfers;
            let mode = config.mode;

            thread::spawn(move || {
                for i in 0..transfers {
                    let from = (t * transfers + i) % accounts;
                    let to = (from + 1 + i % (accounts - 1)) % accounts;
                    let amount = 1 + (i % 10) as i64;

                    let result = db.transaction_with_retry(mode, |txn| {
                        transfer(txn, table, from as i64, to as i64, amount)
                    });
                    match result {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Creates a fresh database, seeds it and runs the transfer workload.
pub fn run_transfer_workload(config: &StressConfig) -> CoreResult<TransferReport> {
    let db = Arc::new(Database::new(
        Config::new().max_retries(config.max_retries),
    ));
    let table = create_accounts_table(&db)?;
    seed_accounts(&db, table, config.accounts.max(2), config.initial_balance)?;
    let expected_total = total_balance(&db, table)?;

    let result = stress_transfers(Arc::clone(&db), table, config);
    let actual_total = total_balance(&db, table)?;

    Ok(TransferReport {
        mode: config.mode,
        result,
        expected_total,
        actual_total,
        stats: db.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;

    #[test]
    fn test_single_transfer() {
        let test_db = TestDatabase::with_accounts(2, 100);
        test_db
            .transaction(IsolationMode::Locking, |txn| {
                transfer(txn, test_db.accounts, 0, 1, 30)
            })
            .unwrap();

        let balances = test_db
            .transaction(IsolationMode::SnapshotMvcc, |txn| {
                Ok((txn.get(test_db.accounts, 0)?, txn.get(test_db.accounts, 1)?))
            })
            .unwrap();
        assert_eq!(balances.0.get("amount").as_integer(), Some(70));
        assert_eq!(balances.1.get("amount").as_integer(), Some(130));
    }

    #[test]
    fn test_overdraft_rolls_back() {
        let test_db = TestDatabase::with_accounts(2, 10);
        let err = test_db
            .transaction(IsolationMode::Locking, |txn| {
                transfer(txn, test_db.accounts, 0, 1, 11)
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(test_db.total_balance().unwrap(), 20);
    }

    #[test]
    fn test_locking_transfers_preserve_total() {
        let config = StressConfig {
            threads: 4,
            transfers: 100,
            accounts: 8,
            mode: IsolationMode::Locking,
            ..Default::default()
        };

        let report = run_transfer_workload(&config).unwrap();
        assert!(report.balance_preserved());
        assert_eq!(report.result.total_ops, 400);
        assert_eq!(report.expected_total, 8_000);
    }

    #[test]
    fn test_mvcc_transfers_preserve_total() {
        let config = StressConfig {
            threads: 4,
            transfers: 100,
            accounts: 8,
            mode: IsolationMode::SnapshotMvcc,
            ..Default::default()
        };

        let report = run_transfer_workload(&config).unwrap();
        assert!(report.balance_preserved());
        assert_eq!(report.result.total_ops, 400);
    }

    #[test]
    fn test_reported_commits_match_stats() {
        let config = StressConfig {
            threads: 2,
            transfers: 50,
            accounts: 4,
            ..Default::default()
        };

        let report = run_transfer_workload(&config).unwrap();
        // Seeding and the two balance snapshots commit too.
        assert_eq!(
            report.stats.transactions_committed,
            report.result.successful_ops as u64 + 3
        );
    }
}
