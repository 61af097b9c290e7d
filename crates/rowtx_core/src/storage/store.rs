//! In-memory row store.

use crate::error::{CoreError, CoreResult};
use crate::storage::version::{RowVersion, VersionChain};
use crate::types::{TableId, Timestamp};
use crate::value::{Row, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};

/// Committed rows of one table, keyed by primary key.
#[derive(Debug, Default)]
pub struct TableRows {
    rows: BTreeMap<Value, VersionChain>,
}

impl TableRows {
    /// Returns the version chain of a row.
    #[must_use]
    pub fn chain(&self, pk: &Value) -> Option<&VersionChain> {
        self.rows.get(pk)
    }

    /// Returns the latest committed contents of a row.
    #[must_use]
    pub fn latest(&self, pk: &Value) -> Option<&Row> {
        self.rows
            .get(pk)
            .and_then(VersionChain::latest)
            .and_then(RowVersion::row)
    }

    /// Returns the contents a snapshot taken at `snapshot` sees.
    #[must_use]
    pub fn visible(&self, pk: &Value, snapshot: Timestamp) -> Option<&Row> {
        self.rows
            .get(pk)
            .and_then(|c| c.visible(snapshot))
            .and_then(RowVersion::row)
    }

    /// Returns the commit timestamp of the row's newest version, live or not.
    #[must_use]
    pub fn head_ts(&self, pk: &Value) -> Option<Timestamp> {
        self.rows.get(pk).and_then(VersionChain::head_ts)
    }

    /// Iterates latest committed live rows in key order.
    pub fn iter_latest(&self) -> impl Iterator<Item = (&Value, &Row)> {
        self.rows
            .iter()
            .filter_map(|(pk, chain)| chain.latest().and_then(RowVersion::row).map(|r| (pk, r)))
    }

    /// Iterates rows visible at `snapshot` in key order.
    pub fn iter_visible(&self, snapshot: Timestamp) -> impl Iterator<Item = (&Value, &Row)> {
        self.rows.iter().filter_map(move |(pk, chain)| {
            chain
                .visible(snapshot)
                .and_then(RowVersion::row)
                .map(|r| (pk, r))
        })
    }

    /// Returns the number of keys with at least one version.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the number of versions across all rows.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.rows.values().map(VersionChain::len).sum()
    }

    fn publish(&mut self, pk: Value, version: RowVersion) {
        self.rows.entry(pk).or_default().push(version);
    }

    fn prune(&mut self, horizon: Timestamp, report: &mut PruneReport) {
        for chain in self.rows.values_mut() {
            report.versions_pruned += chain.prune(horizon);
        }
        let before = self.rows.len();
        self.rows.retain(|_, chain| !chain.is_dead(horizon));
        let removed = before - self.rows.len();
        report.rows_removed += removed;
        report.versions_pruned += removed;
    }
}

/// All tables of a store.
#[derive(Debug, Default)]
pub struct Tables {
    tables: HashMap<TableId, TableRows>,
}

impl Tables {
    /// Returns the rows of a table.
    pub fn table(&self, id: TableId) -> CoreResult<&TableRows> {
        self.tables.get(&id).ok_or_else(|| CoreError::unknown_table(id))
    }

    /// Appends a committed version to a row's chain.
    pub(crate) fn publish(&mut self, table: TableId, pk: Value, version: RowVersion) {
        self.tables.entry(table).or_default().publish(pk, version);
    }

    /// Returns the number of versions across all tables.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.tables.values().map(TableRows::version_count).sum()
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Versions dropped.
    pub versions_pruned: usize,
    /// Rows whose whole chain was dropped.
    pub rows_removed: usize,
}

/// In-memory table store with one version chain per row.
///
/// Chains are append-only: versions are published under the write guard
/// during commit and never modified afterwards. Readers take the read guard.
#[derive(Debug, Default)]
pub struct RowStore {
    tables: RwLock<Tables>,
}

impl RowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty table.
    pub fn create_table(&self, id: TableId) {
        self.tables.write().tables.entry(id).or_default();
    }

    /// Acquires shared access to all tables.
    pub fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read()
    }

    /// Acquires exclusive access to all tables.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }

    /// Returns the latest committed contents of a row.
    pub fn latest(&self, table: TableId, pk: &Value) -> CoreResult<Option<Row>> {
        Ok(self.read().table(table)?.latest(pk).cloned())
    }

    /// Returns the contents of a row as seen by a snapshot.
    pub fn visible(&self, table: TableId, pk: &Value, snapshot: Timestamp) -> CoreResult<Option<Row>> {
        Ok(self.read().table(table)?.visible(pk, snapshot).cloned())
    }

    /// Returns the total number of stored versions.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.read().version_count()
    }

    /// Drops versions invisible to every snapshot at or after `horizon`.
    pub fn prune(&self, horizon: Timestamp) -> PruneReport {
        let mut report = PruneReport::default();
        for rows in self.write().tables.values_mut() {
            rows.prune(horizon, &mut report);
        }
        report
    }
}
