//! Stress command implementation.

use clap::ValueEnum;
use rowtx_core::IsolationMode;
use rowtx_testkit::{run_transfer_workload, StressConfig, TransferReport};
use tracing::{info, warn};

/// Isolation mode selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Shared/exclusive row locks
    Locking,
    /// Snapshot reads, first updater wins
    Mvcc,
}

impl From<ModeArg> for IsolationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Locking => IsolationMode::Locking,
            ModeArg::Mvcc => IsolationMode::SnapshotMvcc,
        }
    }
}

/// Runs the stress command.
pub fn run(
    threads: usize,
    transfers: usize,
    accounts: usize,
    mode: ModeArg,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = StressConfig {
        threads,
        transfers,
        accounts,
        mode: mode.into(),
        ..StressConfig::default()
    };
    info!(?config, "starting transfer workload");

    let report = run_transfer_workload(&config)?;
    if !report.balance_preserved() {
        warn!(
            expected = report.expected_total,
            actual = report.actual_total,
            "balance total changed"
        );
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print_report(&report),
        other => return Err(format!("Unknown format: {other}").into()),
    }

    if report.balance_preserved() {
        Ok(())
    } else {
        Err("balance total was not preserved".into())
    }
}

fn print_report(report: &TransferReport) {
    report
        .result
        .print_summary(&format!("transfers ({})", report.mode));
    println!(
        "Balance: expected {}, actual {} ({})",
        report.expected_total,
        report.actual_total,
        if report.balance_preserved() {
            "preserved"
        } else {
            "CHANGED"
        }
    );
    let stats = &report.stats;
    println!(
        "Aborts: {} (deadlocks {}, write conflicts {}, violations {})",
        stats.transactions_aborted, stats.deadlocks, stats.write_conflicts, stats.constraint_violations
    );
    println!("Lock waits: {}", stats.lock_waits);
    println!("GC runs: {} ({} versions pruned)", stats.gc_runs, stats.versions_pruned);
}
