//! Property-based test generators using proptest.
//!
//! Provides strategies for values, rows and batches of account operations,
//! plus [`apply_batch`] and [`AccountModel`] for checking the database
//! against a plain map.

use crate::fixtures::account;
use proptest::prelude::*;
use rowtx_core::{CoreError, CoreResult, Database, IsolationMode, Row, TableId, Value};
use std::collections::BTreeMap;

/// Strategy for generating column values of any type.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        1 => any::<bool>().prop_map(Value::Bool),
        3 => any::<i64>().prop_map(Value::Integer),
        2 => prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for generating valid account rows.
pub fn account_row_strategy(max_id: i64) -> impl Strategy<Value = Row> {
    (0..max_id, "[a-z]{1,8}", 0..10_000i64)
        .prop_map(|(id, name, amount)| account(id, &name, amount))
}

/// One operation on the `accounts` table.
#[derive(Debug, Clone)]
pub enum AccountOperation {
    /// Insert a new account
    Insert {
        /// Primary key
        id: i64,
        /// Balance
        amount: i64,
    },
    /// Set the balance of an account
    Update {
        /// Primary key
        id: i64,
        /// New balance
        amount: i64,
    },
    /// Delete an account
    Delete {
        /// Primary key
        id: i64,
    },
}

/// A batch of operations run in one transaction.
#[derive(Debug, Clone)]
pub struct OperationBatch {
    /// Operations in order.
    pub operations: Vec<AccountOperation>,
    /// Whether the batch commits (`false` rolls back after the last operation).
    pub commit: bool,
}

/// Strategy for generating account operations over a small key space.
pub fn account_operation_strategy(max_id: i64) -> impl Strategy<Value = AccountOperation> {
    prop_oneof![
        3 => (0..max_id, 0..1_000i64).prop_map(|(id, amount)| AccountOperation::Insert { id, amount }),
        2 => (0..max_id, 0..1_000i64).prop_map(|(id, amount)| AccountOperation::Update { id, amount }),
        1 => (0..max_id).prop_map(|id| AccountOperation::Delete { id }),
    ]
}

/// Strategy for generating a sequence of transaction batches.
pub fn batch_sequence_strategy(
    max_id: i64,
    max_batches: usize,
) -> impl Strategy<Value = Vec<OperationBatch>> {
    let batch = (
        prop::collection::vec(account_operation_strategy(max_id), 1..6),
        prop::bool::weighted(0.8),
    )
        .prop_map(|(operations, commit)| OperationBatch { operations, commit });
    prop::collection::vec(batch, 1..max_batches)
}

/// Runs a batch in one transaction.
///
/// Returns the commit error, the first failing operation's error, or
/// `InvalidOperation` for an intentional rollback.
pub fn apply_batch(
    db: &Database,
    table: TableId,
    mode: IsolationMode,
    batch: &OperationBatch,
) -> CoreResult<()> {
    db.transaction(mode, |txn| {
        for op in &batch.operations {
            match *op {
                AccountOperation::Insert { id, amount } => {
                    txn.insert(table, account(id, &format!("account-{id}"), amount))?;
                }
                AccountOperation::Update { id, amount } => {
                    txn.update(table, id, Row::new().with("amount", amount))?;
                }
                AccountOperation::Delete { id } => {
                    txn.delete(table, id)?;
                }
            }
        }
        if batch.commit {
            Ok(())
        } else {
            Err(CoreError::invalid_operation("rollback requested"))
        }
    })
}

/// Expected table contents: primary key to balance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountModel {
    /// Balances by id.
    pub balances: BTreeMap<i64, i64>,
}

impl AccountModel {
    /// Applies a batch with all-or-nothing semantics.
    ///
    /// A duplicate insert fails the whole batch, as does `commit == false`.
    pub fn apply(&mut self, batch: &OperationBatch) {
        let mut next = self.balances.clone();
        for op in &batch.operations {
            match *op {
                AccountOperation::Insert { id, amount } => {
                    if next.insert(id, amount).is_some() {
                        return;
                    }
                }
                AccountOperation::Update { id, amount } => {
                    if let Some(balance) = next.get_mut(&id) {
                        *balance = amount;
                    }
                }
                AccountOperation::Delete { id } => {
                    next.remove(&id);
                }
            }
        }
        if batch.commit {
            self.balances = next;
        }
    }

    /// Reads the model back from the database.
    pub fn load(db: &Database, table: TableId) -> CoreResult<Self> {
        db.transaction(IsolationMode::SnapshotMvcc, |txn| {
            let balances = txn
                .scan(table)?
                .into_iter()
                .filter_map(|(pk, row)| Some((pk.as_integer()?, row.get("amount").as_integer()?)))
                .collect();
            Ok(Self { balances })
        })
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
