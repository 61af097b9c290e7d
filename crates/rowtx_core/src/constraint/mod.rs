//! Table constraints.
//!
//! Supported rules mirror what a relational table declares:
//! - `PRIMARY KEY` (implicit, one per table, never null, unique)
//! - `UNIQUE (col, ...)` (tuples containing `NULL` never collide)
//! - `NOT NULL (col, ...)`
//! - `CHECK (col <op> literal)` (passes when the column is `NULL`)

mod checker;

pub use checker::ConstraintChecker;

use crate::value::Value;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Name of the implicit primary key constraint.
pub const PRIMARY: &str = "PRIMARY";

/// Comparison operator of a CHECK predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Evaluates `lhs <op> rhs`.
    ///
    /// Returns `None` (unknown) when either side is `NULL` or the values are
    /// of different types.
    #[must_use]
    pub fn eval(self, lhs: &Value, rhs: &Value) -> Option<bool> {
        if lhs.column_type()? != rhs.column_type()? {
            return None;
        }
        let ord = lhs.cmp(rhs);
        Some(match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        })
    }
}

/// Predicate of a CHECK constraint: `column <op> operand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPredicate {
    /// Comparison operator.
    pub op: CompareOp,
    /// Literal right-hand side.
    pub operand: Value,
}

/// Kind of a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Primary key: not null and unique.
    PrimaryKey,
    /// Unique over a column tuple.
    Unique,
    /// Every listed column is not null.
    NotNull,
    /// Single-column comparison with a literal.
    Check(CheckPredicate),
}

/// A named rule over one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Constraint name, reported on violation.
    pub name: String,
    /// What the rule enforces.
    pub kind: ConstraintKind,
    /// Columns the rule applies to.
    pub columns: Vec<String>,
}

impl Constraint {
    /// `UNIQUE (columns...)`.
    pub fn unique<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ConstraintKind::Unique,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// `NOT NULL (column)`.
    pub fn not_null(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::NotNull,
            columns: vec![column.into()],
        }
    }

    /// `CHECK (column <op> operand)`.
    pub fn check(
        name: impl Into<String>,
        column: impl Into<String>,
        op: CompareOp,
        operand: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Check(CheckPredicate {
                op,
                operand: operand.into(),
            }),
            columns: vec![column.into()],
        }
    }

    pub(crate) fn primary_key(column: impl Into<String>) -> Self {
        Self {
            name: PRIMARY.to_string(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec![column.into()],
        }
    }
}
