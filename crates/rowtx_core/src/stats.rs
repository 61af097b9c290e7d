//! Database statistics.
//!
//! Counters for monitoring transaction outcomes and lock contention.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rowtx_core::Database;
//!
//! let db = Database::in_memory();
//! // ... run transactions ...
//! let stats = db.stats();
//! println!("Commits: {}", stats.transactions_committed);
//! println!("Deadlocks: {}", stats.deadlocks);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Database statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Operation counters
    /// Total number of row reads.
    reads: AtomicU64,
    /// Total number of buffered inserts/updates.
    writes: AtomicU64,
    /// Total number of buffered deletes.
    deletes: AtomicU64,
    /// Total number of table scans.
    scans: AtomicU64,

    // Transaction counters
    /// Total number of transactions started.
    transactions_started: AtomicU64,
    /// Total number of transactions committed.
    transactions_committed: AtomicU64,
    /// Total number of transactions aborted.
    transactions_aborted: AtomicU64,

    // Concurrency counters
    /// Lock requests that had to block.
    lock_waits: AtomicU64,
    /// Deadlock victims.
    deadlocks: AtomicU64,
    /// Snapshot write conflicts.
    write_conflicts: AtomicU64,
    /// Rejected writes and commits due to constraints.
    constraint_violations: AtomicU64,

    // Garbage collection
    /// Garbage collection passes.
    gc_runs: AtomicU64,
    /// Versions dropped by garbage collection.
    versions_pruned: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_constraint_violation(&self) {
        self.constraint_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc(&self, versions_pruned: u64) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.versions_pruned
            .fetch_add(versions_pruned, Ordering::Relaxed);
    }

    /// Returns the total number of row reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the total number of buffered inserts/updates.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the total number of buffered deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the total number of table scans.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions aborted.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of lock requests that blocked.
    pub fn lock_waits(&self) -> u64 {
        self.lock_waits.load(Ordering::Relaxed)
    }

    /// Returns the number of deadlock victims.
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    /// Returns the number of snapshot write conflicts.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of constraint violations.
    pub fn constraint_violations(&self) -> u64 {
        self.constraint_violations.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            deletes: self.deletes(),
            scans: self.scans(),
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            lock_waits: self.lock_waits(),
            deadlocks: self.deadlocks(),
            write_conflicts: self.write_conflicts(),
            constraint_violations: self.constraint_violations(),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            versions_pruned: self.versions_pruned.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Total number of row reads.
    pub reads: u64,
    /// Total number of buffered inserts/updates.
    pub writes: u64,
    /// Total number of buffered deletes.
    pub deletes: u64,
    /// Total number of table scans.
    pub scans: u64,
    /// Total number of transactions started.
    pub transactions_started: u64,
    /// Total number of transactions committed.
    pub transactions_committed: u64,
    /// Total number of transactions aborted.
    pub transactions_aborted: u64,
    /// Lock requests that blocked.
    pub lock_waits: u64,
    /// Deadlock victims.
    pub deadlocks: u64,
    /// Snapshot write conflicts.
    pub write_conflicts: u64,
    /// Constraint violations.
    pub constraint_violations: u64,
    /// Garbage collection passes.
    pub gc_runs: u64,
    /// Versions dropped by garbage collection.
    pub versions_pruned: u64,
}
