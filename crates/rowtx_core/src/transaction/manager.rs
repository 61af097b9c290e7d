//! Transaction manager.

use crate::config::Config;
use crate::constraint::{Constraint, ConstraintChecker, PRIMARY};
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockGrant, LockMode, LockTable};
use crate::schema::{Catalog, TableSchema};
use crate::stats::DatabaseStats;
use crate::storage::{RowStore, RowVersion, Tables};
use crate::transaction::clock::CommitClock;
use crate::transaction::state::{Transaction, TransactionState};
use crate::types::{IsolationMode, RowKey, TableId, Timestamp, TransactionId};
use crate::value::{Row, Value};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Registry slot of one transaction.
///
/// `start_ts` and `finished` live outside the mutex so garbage collection can
/// compute the horizon without waiting on busy transactions.
#[derive(Debug)]
struct TxnEntry {
    start_ts: Timestamp,
    finished: AtomicBool,
    txn: Mutex<Transaction>,
}

impl TxnEntry {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

enum WriteOp {
    Insert(Row),
    Upsert(Row),
    Update { pk: Value, changes: Row },
    Delete { pk: Value },
}

impl WriteOp {
    fn row(&self) -> Option<&Row> {
        match self {
            WriteOp::Insert(row) | WriteOp::Upsert(row) => Some(row),
            WriteOp::Update { changes, .. } => Some(changes),
            WriteOp::Delete { .. } => None,
        }
    }
}

/// Outcome of a garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Oldest timestamp any active snapshot may read at.
    pub horizon: Timestamp,
    /// Row versions dropped.
    pub versions_pruned: usize,
    /// Rows removed entirely.
    pub rows_removed: usize,
    /// Finished transactions dropped from the registry.
    pub transactions_forgotten: usize,
}

/// Manages transactions over the row store.
///
/// The transaction manager provides:
/// - Strictly increasing transaction IDs and start timestamps
/// - Locking reads (shared locks, latest committed value) and snapshot reads
///   (no locks, newest version at the start timestamp)
/// - Exclusive locks for every write in both modes, with first-updater-wins
///   conflict detection for snapshot transactions
/// - Constraint checks on every write and again at commit
/// - Atomic commit under the [`CommitClock`] critical section
///
/// ## Failure policy
///
/// The first failing write aborts the whole transaction: its buffered
/// writes are discarded and its locks released before the error is returned.
/// Deadlocks, lock timeouts and write conflicts raised by reads abort it too.
pub struct TransactionManager {
    config: Config,
    catalog: Catalog,
    constraints: ConstraintChecker,
    store: Arc<RowStore>,
    locks: Arc<LockTable>,
    clock: Arc<CommitClock>,
    stats: Arc<DatabaseStats>,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Live and recently finished transactions.
    txns: RwLock<HashMap<TransactionId, Arc<TxnEntry>>>,
    commits_since_gc: AtomicU64,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new(
        config: Config,
        store: Arc<RowStore>,
        locks: Arc<LockTable>,
        clock: Arc<CommitClock>,
        stats: Arc<DatabaseStats>,
    ) -> Self {
        Self {
            config,
            catalog: Catalog::new(),
            constraints: ConstraintChecker::new(),
            store,
            locks,
            clock,
            stats,
            next_txid: AtomicU64::new(1),
            txns: RwLock::new(HashMap::new()),
            commits_since_gc: AtomicU64::new(0),
        }
    }

    // === Schema ===

    /// Registers a table.
    pub fn create_table(&self, schema: TableSchema) -> CoreResult<TableId> {
        let id = self.catalog.create(schema)?;
        let schema = self.catalog.schema(id)?;
        self.store.create_table(id);
        self.constraints.register_table(id, &schema);
        debug!(table = %schema.name(), %id, "table created");
        Ok(id)
    }

    /// Returns the table catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Adds a constraint to a table.
    ///
    /// Commits are held off while existing rows are validated. Transactions
    /// that already buffered violating rows fail at commit.
    pub fn define_constraint(&self, table: TableId, constraint: Constraint) -> CoreResult<()> {
        let schema = self.catalog.schema(table)?;
        let _serial = self.clock.begin_commit();
        let tables = self.store.read();
        let name = constraint.name.clone();
        self.constraints
            .define(table, &schema, constraint, tables.table(table)?)?;
        debug!(table = %schema.name(), constraint = %name, "constraint defined");
        Ok(())
    }

    /// Returns the constraints of a table.
    #[must_use]
    pub fn constraints(&self, table: TableId) -> Vec<Constraint> {
        self.constraints.constraints(table)
    }

    // === Lifecycle ===

    /// Begins a new transaction.
    ///
    /// The start timestamp is the latest published commit; snapshot reads
    /// see exactly the commits up to it.
    pub fn begin(&self, mode: IsolationMode) -> CoreResult<TransactionId> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));

        // Registering under the write guard keeps the snapshot visible to
        // garbage collection from the moment it is taken.
        let mut txns = self.txns.write();
        let start_ts = self.clock.now();
        txns.insert(
            txid,
            Arc::new(TxnEntry {
                start_ts,
                finished: AtomicBool::new(false),
                txn: Mutex::new(Transaction::new(txid, mode, start_ts)),
            }),
        );
        drop(txns);

        self.stats.record_transaction_start();
        debug!(txn = %txid, %mode, start = %start_ts, "transaction started");
        Ok(txid)
    }

    /// Commits a transaction.
    ///
    /// Inside one critical section: re-validates constraints against the
    /// latest committed state, assigns the next commit timestamp, publishes
    /// every buffered version and releases all locks. If re-validation fails
    /// nothing is published and the transaction is aborted.
    pub fn commit(&self, txid: TransactionId) -> CoreResult<Timestamp> {
        let entry = self.entry(txid)?;
        let mut txn = entry.txn.lock();
        txn.ensure_active()?;

        let mut serial = self.clock.begin_commit();
        let mut tables = self.store.write();

        if let Err(err) = self.revalidate(&txn, &tables) {
            drop(tables);
            drop(serial);
            if matches!(err, CoreError::ConstraintViolation { .. }) {
                self.stats.record_constraint_violation();
            }
            let reason = err.to_string();
            txn.mark_aborted(reason.clone());
            entry.finish();
            drop(txn);
            self.locks.release(txid);
            self.stats.record_transaction_abort();
            warn!(txn = %txid, %reason, "commit failed re-validation");
            return Err(CoreError::TransactionAborted { txn: txid, reason });
        }

        let ts = serial.timestamp();
        let writes = txn.take_writes();
        let mut published = 0usize;
        for (table, rows) in writes {
            for (pk, version) in rows {
                tables.publish(table, pk, version.commit(ts));
                published += 1;
            }
        }
        drop(tables);
        serial.publish();

        txn.mark_committed(ts);
        entry.finish();
        drop(txn);
        self.locks.release(txid);
        drop(serial);

        self.stats.record_transaction_commit();
        debug!(txn = %txid, commit = %ts, writes = published, "transaction committed");
        self.maybe_collect_garbage();
        Ok(ts)
    }

    /// Aborts a transaction.
    ///
    /// Discards the write set, releases all locks and cancels a pending lock
    /// wait. Aborting an aborted transaction is a no-op; aborting a committed
    /// one fails with `NotActive`.
    pub fn abort(&self, txid: TransactionId) -> CoreResult<()> {
        let entry = self.entry(txid)?;
        self.abort_entry(&entry, txid, "rolled back")
    }

    /// Aborts a transaction if it is still active; used by drop guards.
    pub(crate) fn abort_if_active(&self, txid: TransactionId) {
        if let Ok(entry) = self.entry(txid) {
            if entry.txn.lock().is_active() {
                let _ = self.abort_entry(&entry, txid, "handle dropped");
            }
        }
    }

    // === Reads ===

    /// Reads a row.
    ///
    /// The transaction's own pending write wins. Otherwise a locking
    /// transaction takes a shared lock (unless disabled in [`Config`]) and
    /// reads the latest committed version; a snapshot transaction reads the
    /// newest version visible at its start timestamp without locking.
    pub fn read(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<Option<Row>> {
        let entry = self.entry(txid)?;
        self.read_row(&entry, txid, table, pk, false)
            .map_err(|e| self.fail(&entry, txid, e, false))
    }

    /// Reads a row that must exist.
    pub fn get(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<Row> {
        self.read(txid, table, pk)?.ok_or_else(|| CoreError::NotFound {
            table: self.table_name(table),
            key: pk.clone(),
        })
    }

    /// Reads a row under an exclusive lock (`SELECT ... FOR UPDATE`).
    ///
    /// A snapshot transaction fails with `WriteConflict` if the row changed
    /// after its snapshot.
    pub fn read_for_update(
        &self,
        txid: TransactionId,
        table: TableId,
        pk: &Value,
    ) -> CoreResult<Option<Row>> {
        let entry = self.entry(txid)?;
        self.read_row(&entry, txid, table, pk, true)
            .map_err(|e| self.fail(&entry, txid, e, false))
    }

    /// Returns every row visible to the transaction, in key order.
    ///
    /// Locking transactions take shared locks on the returned rows; rows
    /// inserted concurrently after the scan are not locked out.
    pub fn scan(&self, txid: TransactionId, table: TableId) -> CoreResult<Vec<(Value, Row)>> {
        let entry = self.entry(txid)?;
        self.scan_rows(&entry, txid, table)
            .map_err(|e| self.fail(&entry, txid, e, false))
    }

    // === Writes ===

    /// Inserts a new row; fails on an existing primary key.
    pub fn insert(&self, txid: TransactionId, table: TableId, row: Row) -> CoreResult<()> {
        self.apply(txid, table, WriteOp::Insert(row)).map(|_| ())
    }

    /// Inserts or replaces a row.
    pub fn write(&self, txid: TransactionId, table: TableId, row: Row) -> CoreResult<()> {
        self.apply(txid, table, WriteOp::Upsert(row)).map(|_| ())
    }

    /// Merges `changes` into an existing row.
    ///
    /// Returns `false` if the row does not exist.
    pub fn update(
        &self,
        txid: TransactionId,
        table: TableId,
        pk: &Value,
        changes: Row,
    ) -> CoreResult<bool> {
        self.apply(
            txid,
            table,
            WriteOp::Update {
                pk: pk.clone(),
                changes,
            },
        )
    }

    /// Deletes a row.
    ///
    /// Returns `false` if the row does not exist.
    pub fn delete(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<bool> {
        self.apply(txid, table, WriteOp::Delete { pk: pk.clone() })
    }

    // === Introspection ===

    /// Returns the state of a transaction still in the registry.
    #[must_use]
    pub fn status(&self, txid: TransactionId) -> Option<TransactionState> {
        let entry = self.txns.read().get(&txid).cloned()?;
        let state = entry.txn.lock().state();
        Some(state)
    }

    /// Runs `f` against a transaction's state.
    pub fn inspect<R>(&self, txid: TransactionId, f: impl FnOnce(&Transaction) -> R) -> CoreResult<R> {
        let entry = self.entry(txid)?;
        let txn = entry.txn.lock();
        Ok(f(&txn))
    }

    /// Returns the latest published commit timestamp.
    #[must_use]
    pub fn committed_ts(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.txns
            .read()
            .values()
            .filter(|e| !e.is_finished())
            .count()
    }

    /// Drops row versions no active snapshot can see and forgets finished
    /// transactions.
    pub fn collect_garbage(&self) -> GcReport {
        let mut txns = self.txns.write();
        let horizon = txns
            .values()
            .filter(|e| !e.is_finished())
            .map(|e| e.start_ts)
            .min()
            .unwrap_or_else(|| self.clock.now());
        let before = txns.len();
        txns.retain(|_, e| !e.is_finished());
        let transactions_forgotten = before - txns.len();
        drop(txns);

        // New snapshots start at or after `clock.now() >= horizon`.
        let pruned = self.store.prune(horizon);
        self.stats.record_gc(pruned.versions_pruned as u64);

        let report = GcReport {
            horizon,
            versions_pruned: pruned.versions_pruned,
            rows_removed: pruned.rows_removed,
            transactions_forgotten,
        };
        debug!(?report, "garbage collected");
        report
    }

    // === Internals ===

    fn entry(&self, txid: TransactionId) -> CoreResult<Arc<TxnEntry>> {
        if let Some(entry) = self.txns.read().get(&txid) {
            return Ok(Arc::clone(entry));
        }
        if txid.as_u64() != 0 && txid.as_u64() < self.next_txid.load(Ordering::SeqCst) {
            Err(CoreError::NotActive { txn: txid })
        } else {
            Err(CoreError::UnknownTransaction { txn: txid })
        }
    }

    fn table_name(&self, table: TableId) -> String {
        self.catalog
            .schema(table)
            .map_or_else(|_| table.to_string(), |s| s.name().to_string())
    }

    fn abort_entry(&self, entry: &TxnEntry, txid: TransactionId, reason: &str) -> CoreResult<()> {
        let mut txn = entry.txn.lock();
        match txn.state() {
            TransactionState::Aborted => return Ok(()),
            TransactionState::Committed => return Err(CoreError::NotActive { txn: txid }),
            TransactionState::Active => {}
        }
        let discarded = txn.write_count();
        txn.mark_aborted(reason);
        entry.finish();
        drop(txn);

        let released = self.locks.release(txid);
        self.stats.record_transaction_abort();
        debug!(txn = %txid, reason, discarded, released, "transaction aborted");
        Ok(())
    }

    /// Aborts the transaction for errors that end it, then hands the error back.
    ///
    /// Any failed write ends the transaction; a failed read only does for
    /// lock and conflict errors.
    fn fail(
        &self,
        entry: &TxnEntry,
        txid: TransactionId,
        err: CoreError,
        write: bool,
    ) -> CoreError {
        match &err {
            CoreError::Deadlock { .. } => self.stats.record_deadlock(),
            CoreError::WriteConflict { .. } => self.stats.record_write_conflict(),
            CoreError::ConstraintViolation { .. } => self.stats.record_constraint_violation(),
            _ => {}
        }
        let ends = if write {
            err.aborts_write()
        } else {
            err.aborts_read()
        };
        if ends {
            let _ = self.abort_entry(entry, txid, &err.to_string());
        }
        err
    }

    /// Acquires a row lock on behalf of a transaction.
    ///
    /// The transaction mutex is not held while blocking. A lock granted to a
    /// transaction that was aborted meanwhile is released again.
    fn lock_row(
        &self,
        entry: &TxnEntry,
        txid: TransactionId,
        key: &RowKey,
        mode: LockMode,
    ) -> CoreResult<()> {
        if self.locks.acquire_unless(txid, key, mode, &entry.finished)? == LockGrant::Waited {
            self.stats.record_lock_wait();
        }
        let mut txn = entry.txn.lock();
        if !txn.is_active() {
            drop(txn);
            self.locks.release(txid);
            return Err(CoreError::NotActive { txn: txid });
        }
        txn.record_lock(key.clone(), mode);
        Ok(())
    }

    fn check_write_conflict(
        &self,
        txid: TransactionId,
        key: &RowKey,
        start_ts: Timestamp,
    ) -> CoreResult<()> {
        let head = self.store.read().table(key.table)?.head_ts(&key.pk);
        if head.is_some_and(|ts| ts > start_ts) {
            return Err(CoreError::WriteConflict {
                txn: txid,
                key: key.clone(),
            });
        }
        Ok(())
    }

    fn read_row(
        &self,
        entry: &TxnEntry,
        txid: TransactionId,
        table: TableId,
        pk: &Value,
        for_update: bool,
    ) -> CoreResult<Option<Row>> {
        self.catalog.schema(table)?;
        let (mode, start_ts) = {
            let txn = entry.txn.lock();
            txn.ensure_active()?;
            // Pending writes already hold the exclusive lock.
            if let Some(version) = txn.pending(table, pk) {
                self.stats.record_read();
                return Ok(version.row().cloned());
            }
            (txn.mode(), txn.start_ts())
        };

        let key = RowKey::new(table, pk.clone());
        let row = if for_update {
            self.lock_row(entry, txid, &key, LockMode::Exclusive)?;
            if mode == IsolationMode::SnapshotMvcc {
                self.check_write_conflict(txid, &key, start_ts)?;
            }
            self.store.latest(table, pk)?
        } else {
            match mode {
                IsolationMode::Locking => {
                    if self.config.shared_read_locks {
                        self.lock_row(entry, txid, &key, LockMode::Shared)?;
                    }
                    self.store.latest(table, pk)?
                }
                IsolationMode::SnapshotMvcc => {
                    let row = self.store.visible(table, pk, start_ts)?;
                    // Once finished, garbage collection may have pruned under the snapshot.
                    if entry.is_finished() {
                        return Err(CoreError::NotActive { txn: txid });
                    }
                    row
                }
            }
        };

        self.stats.record_read();
        trace!(txn = %txid, %key, found = row.is_some(), "row read");
        Ok(row)
    }

    fn scan_rows(
        &self,
        entry: &TxnEntry,
        txid: TransactionId,
        table: TableId,
    ) -> CoreResult<Vec<(Value, Row)>> {
        self.catalog.schema(table)?;
        let (mode, start_ts) = {
            let txn = entry.txn.lock();
            txn.ensure_active()?;
            (txn.mode(), txn.start_ts())
        };

        let mut rows: BTreeMap<Value, Row> = {
            let tables = self.store.read();
            let committed = tables.table(table)?;
            match mode {
                IsolationMode::Locking => committed
                    .iter_latest()
                    .map(|(pk, row)| (pk.clone(), row.clone()))
                    .collect(),
                IsolationMode::SnapshotMvcc => committed
                    .iter_visible(start_ts)
                    .map(|(pk, row)| (pk.clone(), row.clone()))
                    .collect(),
            }
        };

        if mode == IsolationMode::Locking && self.config.shared_read_locks {
            let keys: Vec<Value> = rows.keys().cloned().collect();
            for pk in keys {
                self.lock_row(entry, txid, &RowKey::new(table, pk), LockMode::Shared)?;
            }
            // Re-read under the locks: rows may have changed before they were granted.
            let tables = self.store.read();
            let committed = tables.table(table)?;
            rows = rows
                .into_keys()
                .filter_map(|pk| committed.latest(&pk).cloned().map(|row| (pk, row)))
                .collect();
        }

        let txn = entry.txn.lock();
        txn.ensure_active()?;
        if let Some(pending) = txn.pending_table(table) {
            for (pk, version) in pending {
                match version.row() {
                    Some(row) => {
                        rows.insert(pk.clone(), row.clone());
                    }
                    None => {
                        rows.remove(pk);
                    }
                }
            }
        }
        drop(txn);

        self.stats.record_scan();
        Ok(rows.into_iter().collect())
    }

    fn apply(&self, txid: TransactionId, table: TableId, op: WriteOp) -> CoreResult<bool> {
        let entry = self.entry(txid)?;
        self.apply_write(&entry, txid, table, op)
            .map_err(|e| self.fail(&entry, txid, e, true))
    }

    fn apply_write(
        &self,
        entry: &TxnEntry,
        txid: TransactionId,
        table: TableId,
        op: WriteOp,
    ) -> CoreResult<bool> {
        entry.txn.lock().ensure_active()?;
        let schema = self.catalog.schema(table)?;
        if let Some(row) = op.row() {
            schema.check_row(row)?;
        }
        let pk = match &op {
            WriteOp::Insert(row) | WriteOp::Upsert(row) => schema.key_of(row)?,
            WriteOp::Update { pk, .. } | WriteOp::Delete { pk } => pk.clone(),
        };

        let key = RowKey::new(table, pk.clone());
        self.lock_row(entry, txid, &key, LockMode::Exclusive)?;

        let mut txn = entry.txn.lock();
        txn.ensure_active()?;
        let tables = self.store.read();
        let committed = tables.table(table)?;

        let own = txn.pending(table, &pk).cloned();
        let committed_live = committed.latest(&pk).is_some();
        let current = match &own {
            Some(version) => version.row().cloned(),
            None => committed.latest(&pk).cloned(),
        };

        if matches!(op, WriteOp::Insert(_)) && current.is_some() {
            return Err(CoreError::constraint_violation(
                schema.name(),
                PRIMARY,
                format!("duplicate entry {pk} for key '{PRIMARY}'"),
            ));
        }

        // First updater wins: the row must not have changed after the snapshot.
        if txn.mode() == IsolationMode::SnapshotMvcc
            && own.is_none()
            && committed.head_ts(&pk).is_some_and(|ts| ts > txn.start_ts())
        {
            return Err(CoreError::WriteConflict { txn: txid, key });
        }

        let version = match op {
            WriteOp::Insert(row) | WriteOp::Upsert(row) => RowVersion::pending(txid, row),
            WriteOp::Update { changes, .. } => {
                let Some(current) = current else {
                    return Ok(false);
                };
                let key_column = schema.primary_key();
                if changes.contains(key_column) && changes.get(key_column) != &pk {
                    return Err(CoreError::invalid_operation(format!(
                        "primary key {key_column} of {} is immutable",
                        schema.name()
                    )));
                }
                RowVersion::pending(txid, current.merged(&changes))
            }
            WriteOp::Delete { .. } => {
                if current.is_none() {
                    return Ok(false);
                }
                RowVersion::tombstone(txid)
            }
        };

        if let Some(row) = version.row() {
            self.constraints.check(
                table,
                &schema,
                &pk,
                row,
                committed,
                txn.pending_table(table),
            )?;
        }
        drop(tables);

        if version.is_deleted() {
            if committed_live {
                txn.buffer(table, pk, version);
            } else {
                // Inserted and deleted within this transaction.
                txn.discard(table, &pk);
            }
            self.stats.record_delete();
        } else {
            txn.buffer(table, pk, version);
            self.stats.record_write();
        }
        trace!(txn = %txid, %key, "write buffered");
        Ok(true)
    }

    fn revalidate(&self, txn: &Transaction, tables: &Tables) -> CoreResult<()> {
        for (table, pk, version) in txn.pending_writes() {
            let Some(row) = version.row() else {
                continue;
            };
            let schema = self.catalog.schema(table)?;
            self.constraints.check(
                table,
                &schema,
                pk,
                row,
                tables.table(table)?,
                txn.pending_table(table),
            )?;
        }
        Ok(())
    }

    fn maybe_collect_garbage(&self) {
        let interval = self.config.gc_interval;
        if interval == 0 {
            return;
        }
        let commits = self.commits_since_gc.fetch_add(1, Ordering::SeqCst) + 1;
        if commits >= interval
            && self
                .commits_since_gc
                .compare_exchange(commits, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.collect_garbage();
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_ts", &self.committed_ts())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::CompareOp;
    use crate::value::ColumnType;
    use std::thread;
    use std::time::{Duration, Instant};

    struct Fixture {
        tm: TransactionManager,
        locks: Arc<LockTable>,
        accounts: TableId,
    }

    fn create_manager_with(config: Config) -> Fixture {
        let locks = Arc::new(LockTable::new(config.lock_wait_timeout));
        let tm = TransactionManager::new(
            config,
            Arc::new(RowStore::new()),
            Arc::clone(&locks),
            Arc::new(CommitClock::new()),
            Arc::new(DatabaseStats::new()),
        );
        let accounts = tm
            .create_table(
                TableSchema::new("accounts", "id")
                    .column("id", ColumnType::Integer)
                    .column("name", ColumnType::Text)
                    .column("amount", ColumnType::Integer),
            )
            .unwrap();
        Fixture { tm, locks, accounts }
    }

    fn create_manager() -> Fixture {
        create_manager_with(Config::default())
    }

    fn account(id: i64, name: &str, amount: i64) -> Row {
        Row::new().with("id", id).with("name", name).with("amount", amount)
    }

    fn amount(row: Option<Row>) -> Option<i64> {
        row.and_then(|r| r.get("amount").as_integer())
    }

    fn seed(f: &Fixture, rows: &[Row]) {
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        for row in rows {
            f.tm.insert(tx, f.accounts, row.clone()).unwrap();
        }
        f.tm.commit(tx).unwrap();
    }

    #[test]
    fn begin_creates_transaction() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        assert_eq!(f.tm.status(tx), Some(TransactionState::Active));
        assert_eq!(f.tm.active_count(), 1);
    }

    #[test]
    fn ids_strictly_increase() {
        let f = create_manager();
        let a = f.tm.begin(IsolationMode::Locking).unwrap();
        let b = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert!(b > a);
    }

    #[test]
    fn commit_empty_transaction() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        let ts = f.tm.commit(tx).unwrap();
        assert_eq!(ts, Timestamp::new(1));
        assert_eq!(f.tm.status(tx), Some(TransactionState::Committed));
        assert_eq!(f.tm.active_count(), 0);
    }

    #[test]
    fn cannot_commit_twice() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.commit(tx).unwrap();
        assert_eq!(f.tm.commit(tx).unwrap_err(), CoreError::NotActive { txn: tx });
        assert_eq!(f.tm.abort(tx).unwrap_err(), CoreError::NotActive { txn: tx });
    }

    #[test]
    fn abort_is_idempotent() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.abort(tx).unwrap();
        f.tm.abort(tx).unwrap();
        assert_eq!(f.tm.status(tx), Some(TransactionState::Aborted));
    }

    #[test]
    fn unknown_transaction() {
        let f = create_manager();
        let err = f.tm.read(TransactionId::new(99), f.accounts, &Value::from(1)).unwrap_err();
        assert_eq!(err, CoreError::UnknownTransaction { txn: TransactionId::new(99) });
    }

    #[test]
    fn own_writes_visible_before_commit() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        f.tm.insert(tx, f.accounts, account(1, "Ashish", 5000)).unwrap();
        assert_eq!(amount(f.tm.read(tx, f.accounts, &Value::from(1)).unwrap()), Some(5000));

        let other = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert!(f.tm.read(other, f.accounts, &Value::from(1)).unwrap().is_none());
    }

    #[test]
    fn aborted_writes_not_visible() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(tx, f.accounts, account(1, "Ashish", 5000)).unwrap();
        f.tm.abort(tx).unwrap();

        let reader = f.tm.begin(IsolationMode::Locking).unwrap();
        assert!(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap().is_none());
        assert_eq!(f.locks.held_count(tx), 0);
    }

    #[test]
    fn duplicate_primary_key_aborts_whole_transaction() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(tx, f.accounts, account(2, "Ravi", 100)).unwrap();
        let err = f.tm.insert(tx, f.accounts, account(1, "Dup", 1)).unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { ref constraint, .. } if constraint == PRIMARY));

        assert_eq!(f.tm.status(tx), Some(TransactionState::Aborted));
        assert_eq!(f.tm.commit(tx).unwrap_err(), CoreError::NotActive { txn: tx });

        let reader = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert!(f.tm.read(reader, f.accounts, &Value::from(2)).unwrap().is_none());
    }

    #[test]
    fn null_key_rejected() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        let err = f
            .tm
            .insert(tx, f.accounts, Row::new().with("name", "nobody"))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(f.tm.status(tx), Some(TransactionState::Aborted));
    }

    #[test]
    fn check_constraint_enforced() {
        let f = create_manager();
        f.tm.define_constraint(
            f.accounts,
            Constraint::check("chk_amount", "amount", CompareOp::Gt, 0),
        )
        .unwrap();

        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        let err = f.tm.insert(tx, f.accounts, account(1, "Zero", 0)).unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }

    #[test]
    fn update_merges_and_reports_missing() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        assert!(f
            .tm
            .update(tx, f.accounts, &Value::from(1), Row::new().with("amount", 6000))
            .unwrap());
        assert!(!f
            .tm
            .update(tx, f.accounts, &Value::from(9), Row::new().with("amount", 1))
            .unwrap());
        f.tm.commit(tx).unwrap();

        let reader = f.tm.begin(IsolationMode::Locking).unwrap();
        let row = f.tm.get(reader, f.accounts, &Value::from(1)).unwrap();
        assert_eq!(row.get("name"), &Value::from("Ashish"));
        assert_eq!(row.get("amount"), &Value::from(6000));
    }

    #[test]
    fn primary_key_is_immutable() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        let err = f
            .tm
            .update(tx, f.accounts, &Value::from(1), Row::new().with("id", 2))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn get_missing_is_not_found_and_keeps_transaction() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        let err = f.tm.get(tx, f.accounts, &Value::from(1)).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { ref table, .. } if table == "accounts"));
        assert_eq!(f.tm.status(tx), Some(TransactionState::Active));
    }

    #[test]
    fn write_to_unknown_table_aborts_whole_transaction() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(tx, f.accounts, account(1, "Ashish", 5000)).unwrap();

        let err = f
            .tm
            .insert(tx, TableId::new(99), account(2, "Ravi", 3000))
            .unwrap_err();
        assert!(matches!(err, CoreError::TableNotFound { .. }));
        assert_eq!(f.tm.status(tx), Some(TransactionState::Aborted));
        assert_eq!(f.tm.commit(tx).unwrap_err(), CoreError::NotActive { txn: tx });
        assert_eq!(f.locks.held_count(tx), 0);

        let reader = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert!(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap().is_none());
    }

    #[test]
    fn read_of_unknown_table_keeps_transaction() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        let err = f.tm.read(tx, TableId::new(99), &Value::from(1)).unwrap_err();
        assert!(matches!(err, CoreError::TableNotFound { .. }));
        assert_eq!(f.tm.status(tx), Some(TransactionState::Active));
    }

    #[test]
    fn finished_transaction_never_queues_for_lock() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let holder = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.update(holder, f.accounts, &Value::from(1), Row::new().with("amount", 1))
            .unwrap();

        // Abort has flagged the entry but not yet released the lock table.
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.entry(tx).unwrap().finish();
        let err = f
            .tm
            .update(tx, f.accounts, &Value::from(1), Row::new().with("amount", 2))
            .unwrap_err();
        assert_eq!(err, CoreError::NotActive { txn: tx });
        assert!(!f.locks.is_waiting(tx));

        f.tm.abort(tx).unwrap();
        f.tm.commit(holder).unwrap();
    }

    #[test]
    fn snapshot_read_after_finish_is_not_active() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let tx = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        f.tm.entry(tx).unwrap().finish();
        let err = f.tm.read(tx, f.accounts, &Value::from(1)).unwrap_err();
        assert_eq!(err, CoreError::NotActive { txn: tx });
    }

    #[test]
    fn delete_then_reinsert() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        assert!(f.tm.delete(tx, f.accounts, &Value::from(1)).unwrap());
        assert!(!f.tm.delete(tx, f.accounts, &Value::from(1)).unwrap());
        f.tm.insert(tx, f.accounts, account(1, "Again", 1)).unwrap();
        f.tm.commit(tx).unwrap();

        let reader = f.tm.begin(IsolationMode::Locking).unwrap();
        let row = f.tm.get(reader, f.accounts, &Value::from(1)).unwrap();
        assert_eq!(row.get("name"), &Value::from("Again"));
    }

    #[test]
    fn insert_then_delete_leaves_no_write() {
        let f = create_manager();
        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(tx, f.accounts, account(1, "Tmp", 1)).unwrap();
        assert!(f.tm.delete(tx, f.accounts, &Value::from(1)).unwrap());
        assert_eq!(f.tm.inspect(tx, Transaction::write_count).unwrap(), 0);
    }

    #[test]
    fn snapshot_isolation_reader_sees_old_version() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let reader = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert_eq!(amount(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap()), Some(5000));

        let writer = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.update(writer, f.accounts, &Value::from(1), Row::new().with("amount", 6000))
            .unwrap();
        f.tm.commit(writer).unwrap();

        assert_eq!(amount(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap()), Some(5000));
        let fresh = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert_eq!(amount(f.tm.read(fresh, f.accounts, &Value::from(1)).unwrap()), Some(6000));
    }

    #[test]
    fn snapshot_write_conflict_first_updater_wins() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);

        let slow = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        let fast = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        f.tm.update(fast, f.accounts, &Value::from(1), Row::new().with("amount", 1))
            .unwrap();
        f.tm.commit(fast).unwrap();

        let err = f
            .tm
            .update(slow, f.accounts, &Value::from(1), Row::new().with("amount", 2))
            .unwrap_err();
        assert!(matches!(err, CoreError::WriteConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.tm.status(slow), Some(TransactionState::Aborted));
    }

    #[test]
    fn snapshot_scan_merges_pending() {
        let f = create_manager();
        seed(&f, &[account(1, "A", 1), account(2, "B", 2)]);

        let tx = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        f.tm.delete(tx, f.accounts, &Value::from(1)).unwrap();
        f.tm.insert(tx, f.accounts, account(3, "C", 3)).unwrap();
        let keys: Vec<_> = f
            .tm
            .scan(tx, f.accounts)
            .unwrap()
            .into_iter()
            .map(|(pk, _)| pk)
            .collect();
        assert_eq!(keys, vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn locking_scan_takes_shared_locks() {
        let f = create_manager();
        seed(&f, &[account(1, "A", 1), account(2, "B", 2)]);

        let tx = f.tm.begin(IsolationMode::Locking).unwrap();
        assert_eq!(f.tm.scan(tx, f.accounts).unwrap().len(), 2);
        assert_eq!(f.locks.held_count(tx), 2);
        assert_eq!(f.tm.inspect(tx, Transaction::lock_count).unwrap(), 2);
    }

    #[test]
    fn unique_conflict_detected_at_commit() {
        let f = create_manager();
        f.tm.define_constraint(f.accounts, Constraint::unique("uq_name", ["name"]))
            .unwrap();

        let a = f.tm.begin(IsolationMode::Locking).unwrap();
        let b = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(a, f.accounts, account(1, "Same", 1)).unwrap();
        f.tm.insert(b, f.accounts, account(2, "Same", 2)).unwrap();
        f.tm.commit(a).unwrap();

        let err = f.tm.commit(b).unwrap_err();
        assert!(matches!(err, CoreError::TransactionAborted { .. }));
        assert_eq!(f.tm.status(b), Some(TransactionState::Aborted));

        let reader = f.tm.begin(IsolationMode::Locking).unwrap();
        assert!(f.tm.read(reader, f.accounts, &Value::from(2)).unwrap().is_none());
    }

    #[test]
    fn failed_commit_does_not_consume_timestamp() {
        let f = create_manager();
        f.tm.define_constraint(f.accounts, Constraint::unique("uq_name", ["name"]))
            .unwrap();
        let a = f.tm.begin(IsolationMode::Locking).unwrap();
        let b = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.insert(a, f.accounts, account(1, "Same", 1)).unwrap();
        f.tm.insert(b, f.accounts, account(2, "Same", 2)).unwrap();
        assert_eq!(f.tm.commit(a).unwrap(), Timestamp::new(1));
        assert!(f.tm.commit(b).is_err());
        assert_eq!(f.tm.committed_ts(), Timestamp::new(1));
    }

    #[test]
    fn locking_writer_blocks_until_commit() {
        let f = Arc::new(create_manager());
        seed(&f, &[account(1, "Ashish", 5000)]);

        let first = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.update(first, f.accounts, &Value::from(1), Row::new().with("amount", 6000))
            .unwrap();

        let second = f.tm.begin(IsolationMode::Locking).unwrap();
        let waiter = {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let row = f.tm.read_for_update(second, f.accounts, &Value::from(1)).unwrap();
                f.tm.commit(second).unwrap();
                amount(row)
            })
        };

        let start = Instant::now();
        while !f.locks.is_waiting(second) {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        f.tm.commit(first).unwrap();
        assert_eq!(waiter.join().unwrap(), Some(6000));
    }

    #[test]
    fn abort_cancels_blocked_write() {
        let f = Arc::new(create_manager());
        seed(&f, &[account(1, "Ashish", 5000)]);

        let holder = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.update(holder, f.accounts, &Value::from(1), Row::new().with("amount", 1))
            .unwrap();

        let blocked = f.tm.begin(IsolationMode::Locking).unwrap();
        let waiter = {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                f.tm.update(blocked, f.accounts, &Value::from(1), Row::new().with("amount", 2))
            })
        };

        let start = Instant::now();
        while !f.locks.is_waiting(blocked) {
            assert!(start.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(1));
        }
        f.tm.abort(blocked).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap_err(), CoreError::NotActive { txn: blocked });
        assert_eq!(f.locks.held_count(blocked), 0);
        f.tm.commit(holder).unwrap();
    }

    #[test]
    fn lock_timeout_aborts() {
        let f = create_manager_with(Config::new().lock_wait_timeout(Some(Duration::from_millis(20))));
        seed(&f, &[account(1, "Ashish", 5000)]);

        let holder = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.read_for_update(holder, f.accounts, &Value::from(1)).unwrap();

        let late = f.tm.begin(IsolationMode::Locking).unwrap();
        let err = f.tm.read(late, f.accounts, &Value::from(1)).unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));
        assert_eq!(f.tm.status(late), Some(TransactionState::Aborted));
    }

    #[test]
    fn snapshot_reads_take_no_locks() {
        let f = create_manager();
        seed(&f, &[account(1, "Ashish", 5000)]);
        let writer = f.tm.begin(IsolationMode::Locking).unwrap();
        f.tm.update(writer, f.accounts, &Value::from(1), Row::new().with("amount", 1))
            .unwrap();

        let reader = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        assert_eq!(amount(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap()), Some(5000));
        assert_eq!(f.locks.held_count(reader), 0);
    }

    #[test]
    fn garbage_collection_respects_active_snapshot() {
        let f = create_manager_with(Config::new().gc_interval(0));
        seed(&f, &[account(1, "Ashish", 5000)]);

        let reader = f.tm.begin(IsolationMode::SnapshotMvcc).unwrap();
        for amount in [6000, 7000, 8000] {
            let tx = f.tm.begin(IsolationMode::Locking).unwrap();
            f.tm.update(tx, f.accounts, &Value::from(1), Row::new().with("amount", amount))
                .unwrap();
            f.tm.commit(tx).unwrap();
        }

        let report = f.tm.collect_garbage();
        assert_eq!(report.horizon, Timestamp::new(1));
        assert_eq!(report.versions_pruned, 0);
        assert_eq!(amount(f.tm.read(reader, f.accounts, &Value::from(1)).unwrap()), Some(5000));

        assert_eq!(f.tm.commit(reader).unwrap(), Timestamp::new(5));
        let report = f.tm.collect_garbage();
        assert_eq!(report.horizon, Timestamp::new(5));
        assert_eq!(report.versions_pruned, 3);
        assert!(report.transactions_forgotten >= 1);

        assert_eq!(f.tm.status(reader), None);
        assert_eq!(f.tm.commit(reader).unwrap_err(), CoreError::NotActive { txn: reader });
    }
}
