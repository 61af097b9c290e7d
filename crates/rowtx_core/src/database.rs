//! Database facade.

use crate::config::Config;
use crate::constraint::Constraint;
use crate::error::CoreResult;
use crate::lock::LockTable;
use crate::schema::TableSchema;
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::storage::RowStore;
use crate::transaction::{CommitClock, GcReport, TransactionManager, TransactionState};
use crate::types::{IsolationMode, TableId, Timestamp, TransactionId};
use crate::value::{Row, Value};
use std::sync::Arc;
use tracing::debug;

/// The main database handle.
///
/// `Database` wires the row store, lock table, commit clock and transaction
/// manager together. It provides:
/// - Table and constraint definitions
/// - ID-based transaction operations, safe to call from any thread
/// - A borrowed [`Txn`] handle and closure-based transaction helpers
///
/// # Example
///
/// ```rust,ignore
/// use rowtx_core::{ColumnType, Database, IsolationMode, Row, TableSchema};
///
/// let db = Database::in_memory();
/// let accounts = db.create_table(
///     TableSchema::new("accounts", "id")
///         .column("id", ColumnType::Integer)
///         .column("amount", ColumnType::Integer),
/// )?;
///
/// db.transaction(IsolationMode::Locking, |txn| {
///     txn.insert(accounts, Row::new().with("id", 1).with("amount", 5000))
/// })?;
/// ```
pub struct Database {
    /// Configuration.
    config: Config,
    /// Committed row versions.
    store: Arc<RowStore>,
    /// Row locks.
    locks: Arc<LockTable>,
    /// Commit counter.
    clock: Arc<CommitClock>,
    /// Counters.
    stats: Arc<DatabaseStats>,
    /// Transaction manager.
    txn_manager: TransactionManager,
}

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = Arc::new(RowStore::new());
        let locks = Arc::new(LockTable::new(config.lock_wait_timeout));
        let clock = Arc::new(CommitClock::new());
        let stats = Arc::new(DatabaseStats::new());
        let txn_manager = TransactionManager::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&locks),
            Arc::clone(&clock),
            Arc::clone(&stats),
        );
        Self {
            config,
            store,
            locks,
            clock,
            stats,
            txn_manager,
        }
    }

    /// Creates an empty database with the default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Config::default())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // === Schema ===

    /// Creates a table.
    pub fn create_table(&self, schema: TableSchema) -> CoreResult<TableId> {
        self.txn_manager.create_table(schema)
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> CoreResult<TableId> {
        self.txn_manager.catalog().lookup(name)
    }

    /// Returns a table's schema.
    pub fn schema(&self, table: TableId) -> CoreResult<Arc<TableSchema>> {
        self.txn_manager.catalog().schema(table)
    }

    /// Adds a constraint to a table.
    pub fn define_constraint(&self, table: TableId, constraint: Constraint) -> CoreResult<()> {
        self.txn_manager.define_constraint(table, constraint)
    }

    /// Returns the constraints of a table.
    #[must_use]
    pub fn constraints(&self, table: TableId) -> Vec<Constraint> {
        self.txn_manager.constraints(table)
    }

    // === Transactions by ID ===

    /// Begins a transaction.
    pub fn begin(&self, mode: IsolationMode) -> CoreResult<TransactionId> {
        self.txn_manager.begin(mode)
    }

    /// Reads a row.
    pub fn read(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<Option<Row>> {
        self.txn_manager.read(txid, table, pk)
    }

    /// Reads a row that must exist.
    pub fn get(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<Row> {
        self.txn_manager.get(txid, table, pk)
    }

    /// Reads a row under an exclusive lock.
    pub fn read_for_update(
        &self,
        txid: TransactionId,
        table: TableId,
        pk: &Value,
    ) -> CoreResult<Option<Row>> {
        self.txn_manager.read_for_update(txid, table, pk)
    }

    /// Returns every row visible to the transaction.
    pub fn scan(&self, txid: TransactionId, table: TableId) -> CoreResult<Vec<(Value, Row)>> {
        self.txn_manager.scan(txid, table)
    }

    /// Inserts a new row.
    pub fn insert(&self, txid: TransactionId, table: TableId, row: Row) -> CoreResult<()> {
        self.txn_manager.insert(txid, table, row)
    }

    /// Merges `changes` into an existing row.
    pub fn update(
        &self,
        txid: TransactionId,
        table: TableId,
        pk: &Value,
        changes: Row,
    ) -> CoreResult<bool> {
        self.txn_manager.update(txid, table, pk, changes)
    }

    /// Inserts or replaces a row.
    pub fn write(&self, txid: TransactionId, table: TableId, row: Row) -> CoreResult<()> {
        self.txn_manager.write(txid, table, row)
    }

    /// Deletes a row.
    pub fn delete(&self, txid: TransactionId, table: TableId, pk: &Value) -> CoreResult<bool> {
        self.txn_manager.delete(txid, table, pk)
    }

    /// Commits a transaction.
    pub fn commit(&self, txid: TransactionId) -> CoreResult<Timestamp> {
        self.txn_manager.commit(txid)
    }

    /// Aborts a transaction.
    pub fn abort(&self, txid: TransactionId) -> CoreResult<()> {
        self.txn_manager.abort(txid)
    }

    /// Returns the state of a transaction.
    #[must_use]
    pub fn status(&self, txid: TransactionId) -> Option<TransactionState> {
        self.txn_manager.status(txid)
    }

    // === Handles and helpers ===

    /// Begins a transaction and returns a handle to it.
    ///
    /// Dropping the handle while the transaction is active aborts it.
    pub fn begin_txn(&self, mode: IsolationMode) -> CoreResult<Txn<'_>> {
        let id = self.txn_manager.begin(mode)?;
        Ok(Txn {
            manager: &self.txn_manager,
            id,
        })
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    pub fn transaction<F, T>(&self, mode: IsolationMode, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Txn<'_>) -> CoreResult<T>,
    {
        let txn = self.begin_txn(mode)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = txn.abort();
                Err(err)
            }
        }
    }

    /// Executes a function within a transaction, retrying from `begin` on
    /// deadlock, lock timeout or write conflict.
    ///
    /// Gives up after [`Config::max_retries`] retries and returns the last
    /// error.
    pub fn transaction_with_retry<F, T>(&self, mode: IsolationMode, mut f: F) -> CoreResult<T>
    where
        F: FnMut(&Txn<'_>) -> CoreResult<T>,
    {
        let mut attempt = 0;
        loop {
            match self.transaction(mode, &mut f) {
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %err, "retrying transaction");
                }
                result => return result,
            }
        }
    }

    // === Maintenance and introspection ===

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drops row versions no active snapshot can see.
    pub fn collect_garbage(&self) -> GcReport {
        self.txn_manager.collect_garbage()
    }

    /// Returns the latest published commit timestamp.
    #[must_use]
    pub fn committed_ts(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.txn_manager.active_count()
    }

    /// Returns the number of stored row versions.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.store.version_count()
    }

    /// Returns the lock table.
    #[must_use]
    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("committed_ts", &self.committed_ts())
            .field("active_transactions", &self.active_count())
            .finish_non_exhaustive()
    }
}

/// A borrowed handle to an open transaction.
///
/// Aborts the transaction on drop unless it was committed or aborted.
pub struct Txn<'db> {
    manager: &'db TransactionManager,
    id: TransactionId,
}

impl Txn<'_> {
    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn state(&self) -> Option<TransactionState> {
        self.manager.status(self.id)
    }

    /// Reads a row.
    pub fn read(&self, table: TableId, pk: impl Into<Value>) -> CoreResult<Option<Row>> {
        self.manager.read(self.id, table, &pk.into())
    }

    /// Reads a row that must exist.
    pub fn get(&self, table: TableId, pk: impl Into<Value>) -> CoreResult<Row> {
        self.manager.get(self.id, table, &pk.into())
    }

    /// Reads a row under an exclusive lock.
    pub fn read_for_update(&self, table: TableId, pk: impl Into<Value>) -> CoreResult<Option<Row>> {
        self.manager.read_for_update(self.id, table, &pk.into())
    }

    /// Returns every row visible to this transaction.
    pub fn scan(&self, table: TableId) -> CoreResult<Vec<(Value, Row)>> {
        self.manager.scan(self.id, table)
    }

    /// Inserts a new row.
    pub fn insert(&self, table: TableId, row: Row) -> CoreResult<()> {
        self.manager.insert(self.id, table, row)
    }

    /// Merges `changes` into an existing row.
    pub fn update(&self, table: TableId, pk: impl Into<Value>, changes: Row) -> CoreResult<bool> {
        self.manager.update(self.id, table, &pk.into(), changes)
    }

    /// Inserts or replaces a row.
    pub fn write(&self, table: TableId, row: Row) -> CoreResult<()> {
        self.manager.write(self.id, table, row)
    }

    /// Deletes a row.
    pub fn delete(&self, table: TableId, pk: impl Into<Value>) -> CoreResult<bool> {
        self.manager.delete(self.id, table, &pk.into())
    }

    /// Commits the transaction.
    pub fn commit(self) -> CoreResult<Timestamp> {
        self.manager.commit(self.id)
    }

    /// Aborts the transaction.
    pub fn abort(self) -> CoreResult<()> {
        self.manager.abort(self.id)
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        self.manager.abort_if_active(self.id);
    }
}

impl std::fmt::Debug for Txn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::CompareOp;
    use crate::error::CoreError;
    use crate::value::ColumnType;
    use std::cell::Cell;

    fn create_db() -> (Database, TableId) {
        let db = Database::in_memory();
        let accounts = db
            .create_table(
                TableSchema::new("accounts", "id")
                    .column("id", ColumnType::Integer)
                    .column("name", ColumnType::Text)
                    .column("amount", ColumnType::Integer),
            )
            .unwrap();
        (db, accounts)
    }

    fn account(id: i64, name: &str, amount: i64) -> Row {
        Row::new().with("id", id).with("name", name).with("amount", amount)
    }

    #[test]
    fn table_lookup() {
        let (db, accounts) = create_db();
        assert_eq!(db.table("accounts").unwrap(), accounts);
        assert!(matches!(
            db.table("missing").unwrap_err(),
            CoreError::TableNotFound { .. }
        ));
        assert_eq!(db.schema(accounts).unwrap().primary_key(), "id");
    }

    #[test]
    fn transaction_commits_on_ok() {
        let (db, accounts) = create_db();
        db.transaction(IsolationMode::Locking, |txn| {
            txn.insert(accounts, account(1, "Ashish", 5000))
        })
        .unwrap();

        let row = db
            .transaction(IsolationMode::SnapshotMvcc, |txn| txn.get(accounts, 1))
            .unwrap();
        assert_eq!(row.get("amount"), &Value::from(5000));
        assert_eq!(db.committed_ts(), Timestamp::new(1));
    }

    #[test]
    fn transaction_aborts_on_err() {
        let (db, accounts) = create_db();
        let result: CoreResult<()> = db.transaction(IsolationMode::Locking, |txn| {
            txn.insert(accounts, account(1, "Ashish", 5000))?;
            Err(CoreError::invalid_operation("stop"))
        });
        assert!(result.is_err());

        let txn = db.begin_txn(IsolationMode::Locking).unwrap();
        assert!(txn.read(accounts, 1).unwrap().is_none());
        assert_eq!(db.stats().transactions_aborted, 1);
    }

    #[test]
    fn dropped_handle_aborts() {
        let (db, accounts) = create_db();
        let id = {
            let txn = db.begin_txn(IsolationMode::Locking).unwrap();
            txn.insert(accounts, account(1, "Ashish", 5000)).unwrap();
            txn.id()
        };
        assert_eq!(db.status(id), Some(TransactionState::Aborted));
        assert_eq!(db.lock_table().held_count(id), 0);
    }

    #[test]
    fn retry_reruns_after_write_conflict() {
        let (db, accounts) = create_db();
        db.transaction(IsolationMode::Locking, |txn| {
            txn.insert(accounts, account(1, "Ashish", 5000))
        })
        .unwrap();

        let attempts = Cell::new(0);
        db.transaction_with_retry(IsolationMode::SnapshotMvcc, |txn| {
            attempts.set(attempts.get() + 1);
            let row = txn.get(accounts, 1)?;
            if attempts.get() == 1 {
                // A competing commit lands after this snapshot was taken.
                db.transaction(IsolationMode::Locking, |other| {
                    other.update(accounts, 1, Row::new().with("amount", 1)).map(|_| ())
                })?;
            }
            let amount = row.get("amount").as_integer().unwrap_or(0);
            txn.update(accounts, 1, Row::new().with("amount", amount + 10))
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        let row = db
            .transaction(IsolationMode::Locking, |txn| txn.get(accounts, 1))
            .unwrap();
        assert_eq!(row.get("amount"), &Value::from(11));
        assert_eq!(db.stats().write_conflicts, 1);
    }

    #[test]
    fn retry_gives_up_on_constraint_violation() {
        let (db, accounts) = create_db();
        db.define_constraint(accounts, Constraint::check("positive", "amount", CompareOp::Gt, 0))
            .unwrap();

        let attempts = Cell::new(0);
        let err = db
            .transaction_with_retry(IsolationMode::Locking, |txn| {
                attempts.set(attempts.get() + 1);
                txn.insert(accounts, account(1, "Broke", -1))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn constraints_listed() {
        let (db, accounts) = create_db();
        db.define_constraint(accounts, Constraint::not_null("nn_name", "name"))
            .unwrap();
        let names: Vec<_> = db.constraints(accounts).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["PRIMARY".to_string(), "nn_name".to_string()]);
    }

    #[test]
    fn garbage_collection_shrinks_chains() {
        let (db, accounts) = create_db();
        db.transaction(IsolationMode::Locking, |txn| {
            txn.insert(accounts, account(1, "Ashish", 5000))
        })
        .unwrap();
        for amount in 1..=3 {
            db.transaction(IsolationMode::Locking, |txn| {
                txn.update(accounts, 1, Row::new().with("amount", amount))
            })
            .unwrap();
        }
        assert_eq!(db.version_count(), 4);
        let report = db.collect_garbage();
        assert_eq!(report.versions_pruned, 3);
        assert_eq!(db.version_count(), 1);
        assert_eq!(db.stats().gc_runs, 1);
    }
}
