//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::lock::LockMode;
use crate::storage::RowVersion;
use crate::types::{IsolationMode, RowKey, TableId, Timestamp, TransactionId};
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// Pending writes of one transaction, grouped by table.
pub type WriteSet = BTreeMap<TableId, BTreeMap<Value, RowVersion>>;

/// A transaction.
///
/// Changes made within a transaction are buffered as pending versions and
/// are not visible to other transactions until commit.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Concurrency-control mode.
    mode: IsolationMode,
    /// Snapshot timestamp (snapshot reads see this point in time).
    start_ts: Timestamp,
    /// Current state.
    state: TransactionState,
    /// Set once committed.
    commit_ts: Option<Timestamp>,
    /// Set once aborted.
    abort_reason: Option<String>,
    /// Pending writes.
    writes: WriteSet,
    /// Locks granted to this transaction.
    locks: BTreeMap<RowKey, LockMode>,
}

impl Transaction {
    /// Creates a new active transaction.
    pub(crate) fn new(id: TransactionId, mode: IsolationMode, start_ts: Timestamp) -> Self {
        Self {
            id,
            mode,
            start_ts,
            state: TransactionState::Active,
            commit_ts: None,
            abort_reason: None,
            writes: BTreeMap::new(),
            locks: BTreeMap::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the concurrency-control mode.
    #[must_use]
    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Returns the start (snapshot) timestamp.
    #[must_use]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the commit timestamp, once committed.
    #[must_use]
    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    /// Returns why the transaction aborted, once aborted.
    #[must_use]
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Fails with `NotActive` unless the transaction is active.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::NotActive { txn: self.id })
        }
    }

    /// Buffers a pending version, replacing any earlier one for the key.
    pub(crate) fn buffer(&mut self, table: TableId, pk: Value, version: RowVersion) {
        self.writes.entry(table).or_default().insert(pk, version);
    }

    /// Drops the pending version for a key.
    pub(crate) fn discard(&mut self, table: TableId, pk: &Value) {
        if let Some(rows) = self.writes.get_mut(&table) {
            rows.remove(pk);
            if rows.is_empty() {
                self.writes.remove(&table);
            }
        }
    }

    /// Gets the pending version for a key.
    #[must_use]
    pub fn pending(&self, table: TableId, pk: &Value) -> Option<&RowVersion> {
        self.writes.get(&table).and_then(|rows| rows.get(pk))
    }

    /// Gets all pending versions of one table.
    #[must_use]
    pub fn pending_table(&self, table: TableId) -> Option<&BTreeMap<Value, RowVersion>> {
        self.writes.get(&table)
    }

    /// Iterates all pending writes.
    pub fn pending_writes(&self) -> impl Iterator<Item = (TableId, &Value, &RowVersion)> {
        self.writes
            .iter()
            .flat_map(|(&table, rows)| rows.iter().map(move |(pk, v)| (table, pk, v)))
    }

    /// Returns the number of pending writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.values().map(BTreeMap::len).sum()
    }

    /// Takes the write set, leaving it empty.
    pub(crate) fn take_writes(&mut self) -> WriteSet {
        std::mem::take(&mut self.writes)
    }

    /// Records a granted lock.
    pub(crate) fn record_lock(&mut self, key: RowKey, mode: LockMode) {
        let held = self.locks.entry(key).or_insert(mode);
        *held = (*held).max(mode);
    }

    /// Returns the lock held on a key, if any.
    #[must_use]
    pub fn lock_on(&self, key: &RowKey) -> Option<LockMode> {
        self.locks.get(key).copied()
    }

    /// Returns the number of locks held.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Marks the transaction as committed.
    pub(crate) fn mark_committed(&mut self, ts: Timestamp) {
        self.state = TransactionState::Committed;
        self.commit_ts = Some(ts);
        self.locks.clear();
    }

    /// Marks the transaction as aborted and drops its pending writes.
    pub(crate) fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.state = TransactionState::Aborted;
        self.abort_reason = Some(reason.into());
        self.writes.clear();
        self.locks.clear();
    }
}
