//! Error types for rowtx core.

use crate::types::{RowKey, TableId, TransactionId};
use crate::value::{ColumnType, Value};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in rowtx core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A write violated a table constraint.
    #[error("constraint violation on {table}: {constraint} ({message})")]
    ConstraintViolation {
        /// Table name.
        table: String,
        /// Name of the violated constraint.
        constraint: String,
        /// What was violated.
        message: String,
    },

    /// The transaction was chosen as the victim of a deadlock.
    #[error("deadlock found when trying to get lock; try restarting transaction {txn}")]
    Deadlock {
        /// The victim transaction.
        txn: TransactionId,
    },

    /// A lock wait exceeded the configured timeout.
    #[error("lock wait timeout exceeded for {txn} on {key}")]
    LockTimeout {
        /// The waiting transaction.
        txn: TransactionId,
        /// The key it waited on.
        key: RowKey,
    },

    /// A snapshot transaction tried to modify a row changed after its snapshot.
    #[error("write conflict for {txn} on {key}: row changed after snapshot")]
    WriteConflict {
        /// The conflicting transaction.
        txn: TransactionId,
        /// The contended key.
        key: RowKey,
    },

    /// The transaction is committed, aborted, or was cancelled.
    #[error("transaction {txn} is not active")]
    NotActive {
        /// The transaction.
        txn: TransactionId,
    },

    /// The transaction ID was never issued.
    #[error("unknown transaction {txn}")]
    UnknownTransaction {
        /// The transaction.
        txn: TransactionId,
    },

    /// Row not found.
    #[error("row not found: {key} in table {table}")]
    NotFound {
        /// Table name.
        table: String,
        /// Primary key that was not found.
        key: Value,
    },

    /// Table not found.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Table name or id.
        name: String,
    },

    /// Table already exists.
    #[error("table already exists: {name}")]
    TableExists {
        /// Table name.
        name: String,
    },

    /// Column is not part of the table schema.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Value type does not match the column type.
    #[error("type mismatch for {table}.{column}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Declared column type.
        expected: ColumnType,
        /// The offending value.
        actual: Value,
    },

    /// The transaction was aborted during commit.
    #[error("transaction {txn} aborted: {reason}")]
    TransactionAborted {
        /// The transaction.
        txn: TransactionId,
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a constraint violation error.
    pub fn constraint_violation(
        table: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates a table not found error for a raw table id.
    pub fn unknown_table(id: TableId) -> Self {
        Self::TableNotFound {
            name: id.to_string(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if retrying the whole transaction from `begin` may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Deadlock { .. } | Self::LockTimeout { .. } | Self::WriteConflict { .. }
        )
    }

    /// Returns true if this error aborts the transaction whose read raised it.
    ///
    /// Catalog lookups that fail before the transaction is touched do not.
    #[must_use]
    pub(crate) fn aborts_read(&self) -> bool {
        !matches!(
            self,
            Self::NotActive { .. }
                | Self::UnknownTransaction { .. }
                | Self::TableNotFound { .. }
                | Self::NotFound { .. }
        )
    }

    /// Returns true if this error aborts the transaction whose write raised it.
    ///
    /// Every write failure does unless the transaction had already ended.
    #[must_use]
    pub(crate) fn aborts_write(&self) -> bool {
        !matches!(
            self,
            Self::NotActive { .. } | Self::UnknownTransaction { .. }
        )
    }
}
