//! Test fixtures and database helpers.
//!
//! Provides an `accounts` table matching the demo scenarios:
//! `id INTEGER PRIMARY KEY, name TEXT NOT NULL, amount INTEGER CHECK (amount >= 0)`.

use rowtx_core::{
    ColumnType, CompareOp, Config, Constraint, CoreResult, Database, IsolationMode, Row, TableId,
    TableSchema,
};
use std::sync::Arc;

/// Name of the fixture table.
pub const ACCOUNTS: &str = "accounts";

/// Returns the schema of the `accounts` table.
pub fn accounts_schema() -> TableSchema {
    TableSchema::new(ACCOUNTS, "id")
        .column("id", ColumnType::Integer)
        .column("name", ColumnType::Text)
        .column("amount", ColumnType::Integer)
}

/// Creates the `accounts` table with its NOT NULL and CHECK constraints.
pub fn create_accounts_table(db: &Database) -> CoreResult<TableId> {
    let table = db.create_table(accounts_schema())?;
    db.define_constraint(table, Constraint::not_null("nn_name", "name"))?;
    db.define_constraint(
        table,
        Constraint::check("chk_amount", "amount", CompareOp::Ge, 0),
    )?;
    Ok(table)
}

/// Builds an `accounts` row.
pub fn account(id: i64, name: &str, amount: i64) -> Row {
    Row::new()
        .with("id", id)
        .with("name", name)
        .with("amount", amount)
}

/// Inserts accounts `0..count`, each holding `balance`, in one transaction.
pub fn seed_accounts(db: &Database, table: TableId, count: usize, balance: i64) -> CoreResult<()> {
    db.transaction(IsolationMode::Locking, |txn| {
        for id in 0..count as i64 {
            txn.insert(table, account(id, &format!("account-{id}"), balance))?;
        }
        Ok(())
    })
}

/// Sums the `amount` column over a fresh snapshot.
pub fn total_balance(db: &Database, table: TableId) -> CoreResult<i64> {
    db.transaction(IsolationMode::SnapshotMvcc, |txn| {
        Ok(txn
            .scan(table)?
            .iter()
            .filter_map(|(_, row)| row.get("amount").as_integer())
            .sum())
    })
}

/// A test database with the `accounts` table.
pub struct TestDatabase {
    /// The database instance.
    pub db: Arc<Database>,
    /// The `accounts` table.
    pub accounts: TableId,
}

impl TestDatabase {
    /// Creates a database with an empty `accounts` table.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a database with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let db = Database::new(config);
        let accounts = create_accounts_table(&db).expect("Failed to create accounts table");
        Self {
            db: Arc::new(db),
            accounts,
        }
    }

    /// Creates a database with `count` seeded accounts.
    pub fn with_accounts(count: usize, balance: i64) -> Self {
        let test_db = Self::memory();
        seed_accounts(&test_db.db, test_db.accounts, count, balance)
            .expect("Failed to seed accounts");
        test_db
    }

    /// Sums all balances.
    pub fn total_balance(&self) -> CoreResult<i64> {
        total_balance(&self.db, self.accounts)
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh database holding the `accounts` table.
///
/// # Example
///
/// ```rust,ignore
/// use rowtx_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db, accounts| {
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, TableId) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db, test_db.accounts)
}
