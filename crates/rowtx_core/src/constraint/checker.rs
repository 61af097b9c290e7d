//! Constraint evaluation.

use crate::constraint::{Constraint, ConstraintKind, PRIMARY};
use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::storage::{RowVersion, TableRows};
use crate::types::TableId;
use crate::value::{Row, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-table constraint registry and evaluator.
///
/// Rows are checked against committed rows plus the writing transaction's
/// own pending writes. Other transactions' uncommitted writes are never
/// consulted; conflicts with them surface at commit-time re-validation.
#[derive(Debug, Default)]
pub struct ConstraintChecker {
    rules: RwLock<HashMap<TableId, Vec<Constraint>>>,
}

impl ConstraintChecker {
    /// Creates an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the implicit primary key constraint of a new table.
    pub(crate) fn register_table(&self, table: TableId, schema: &TableSchema) {
        self.rules
            .write()
            .insert(table, vec![Constraint::primary_key(schema.primary_key())]);
    }

    /// Returns the constraints of a table in definition order.
    #[must_use]
    pub fn constraints(&self, table: TableId) -> Vec<Constraint> {
        self.rules.read().get(&table).cloned().unwrap_or_default()
    }

    /// Adds a constraint to a table.
    ///
    /// The constraint must name existing columns, must not reuse a name, and
    /// must already hold for every committed row.
    pub fn define(
        &self,
        table: TableId,
        schema: &TableSchema,
        constraint: Constraint,
        committed: &TableRows,
    ) -> CoreResult<()> {
        validate_definition(schema, &constraint)?;

        let mut rules = self.rules.write();
        let list = rules.entry(table).or_default();
        if list.iter().any(|c| c.name == constraint.name) {
            return Err(CoreError::invalid_operation(format!(
                "constraint {} already exists on {}",
                constraint.name,
                schema.name()
            )));
        }

        let mut seen = HashSet::new();
        for (_, row) in committed.iter_latest() {
            check_row_local(schema.name(), &constraint, row)?;
            if constraint.kind == ConstraintKind::Unique {
                if let Some(tuple) = unique_tuple(&constraint, row) {
                    if !seen.insert(tuple.clone()) {
                        return Err(duplicate(schema.name(), &constraint, &tuple));
                    }
                }
            }
        }

        list.push(constraint);
        Ok(())
    }

    /// Checks a row about to be written under primary key `pk`.
    ///
    /// Returns the first violated constraint as `ConstraintViolation`.
    pub fn check(
        &self,
        table: TableId,
        schema: &TableSchema,
        pk: &Value,
        row: &Row,
        committed: &TableRows,
        pending: Option<&BTreeMap<Value, RowVersion>>,
    ) -> CoreResult<()> {
        let rules = self.rules.read();
        let Some(list) = rules.get(&table) else {
            return Ok(());
        };
        for constraint in list {
            check_row_local(schema.name(), constraint, row)?;
            if constraint.kind == ConstraintKind::Unique {
                if let Some(tuple) = unique_tuple(constraint, row) {
                    if collides(constraint, pk, &tuple, committed, pending) {
                        return Err(duplicate(schema.name(), constraint, &tuple));
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_definition(schema: &TableSchema, constraint: &Constraint) -> CoreResult<()> {
    match &constraint.kind {
        ConstraintKind::PrimaryKey => {
            return Err(CoreError::invalid_operation(format!(
                "table {} already has a primary key",
                schema.name()
            )))
        }
        ConstraintKind::Check(_) if constraint.columns.len() != 1 => {
            return Err(CoreError::invalid_operation(
                "check constraint applies to exactly one column",
            ))
        }
        _ => {}
    }
    if constraint.name.is_empty() || constraint.name == PRIMARY {
        return Err(CoreError::invalid_operation(format!(
            "invalid constraint name '{}'",
            constraint.name
        )));
    }
    if constraint.columns.is_empty() {
        return Err(CoreError::invalid_operation("constraint needs at least one column"));
    }
    for column in &constraint.columns {
        if schema.column_def(column).is_none() {
            return Err(CoreError::UnknownColumn {
                table: schema.name().to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Checks the parts of a constraint that depend on the row alone.
fn check_row_local(table: &str, constraint: &Constraint, row: &Row) -> CoreResult<()> {
    match &constraint.kind {
        ConstraintKind::PrimaryKey | ConstraintKind::NotNull => {
            for column in &constraint.columns {
                if row.get(column).is_null() {
                    return Err(CoreError::constraint_violation(
                        table,
                        &constraint.name,
                        format!("column '{column}' cannot be null"),
                    ));
                }
            }
        }
        ConstraintKind::Check(predicate) => {
            let column = &constraint.columns[0];
            let value = row.get(column);
            if predicate.op.eval(value, &predicate.operand) == Some(false) {
                return Err(CoreError::constraint_violation(
                    table,
                    &constraint.name,
                    format!(
                        "check ({column} {} {}) failed for {value}",
                        predicate.op, predicate.operand
                    ),
                ));
            }
        }
        ConstraintKind::Unique => {}
    }
    Ok(())
}

fn unique_tuple(constraint: &Constraint, row: &Row) -> Option<Vec<Value>> {
    let tuple: Vec<Value> = constraint
        .columns
        .iter()
        .map(|c| row.get(c).clone())
        .collect();
    if tuple.iter().any(Value::is_null) {
        None
    } else {
        Some(tuple)
    }
}

fn matches_tuple(constraint: &Constraint, row: &Row, tuple: &[Value]) -> bool {
    constraint
        .columns
        .iter()
        .zip(tuple)
        .all(|(column, value)| row.get(column) == value)
}

fn collides(
    constraint: &Constraint,
    pk: &Value,
    tuple: &[Value],
    committed: &TableRows,
    pending: Option<&BTreeMap<Value, RowVersion>>,
) -> bool {
    let overridden = |other: &Value| pending.is_some_and(|p| p.contains_key(other));

    let in_committed = committed.iter_latest().any(|(other, row)| {
        other != pk && !overridden(other) && matches_tuple(constraint, row, tuple)
    });
    if in_committed {
        return true;
    }

    pending.is_some_and(|p| {
        p.iter().any(|(other, version)| {
            other != pk
                && version
                    .row()
                    .is_some_and(|row| matches_tuple(constraint, row, tuple))
        })
    })
}

fn duplicate(table: &str, constraint: &Constraint, tuple: &[Value]) -> CoreError {
    let rendered: Vec<String> = tuple.iter().map(ToString::to_string).collect();
    CoreError::constraint_violation(
        table,
        &constraint.name,
        format!(
            "duplicate entry ({}) for key '{}'",
            rendered.join(", "),
            constraint.name
        ),
    )
}
