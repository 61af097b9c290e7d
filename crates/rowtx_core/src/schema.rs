//! Table schemas and the catalog that registers them.

use crate::error::{CoreError, CoreResult};
use crate::types::TableId;
use crate::value::{ColumnType, Row, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: ColumnType,
}

/// Shape of a table: its columns and primary key column.
///
/// ```rust,ignore
/// let accounts = TableSchema::new("accounts", "id")
///     .column("id", ColumnType::Integer)
///     .column("name", ColumnType::Text)
///     .column("amount", ColumnType::Integer);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a schema with the given primary key column name.
    ///
    /// The key column must also be declared with [`TableSchema::column`].
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
        });
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the primary key column name.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the column definitions in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column definition by name.
    #[must_use]
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks that the schema itself is well formed.
    pub(crate) fn validate_definition(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_operation("table name must not be empty"));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(CoreError::invalid_operation(format!(
                    "duplicate column {} in table {}",
                    col.name, self.name
                )));
            }
        }
        if self.column_def(&self.primary_key).is_none() {
            return Err(CoreError::UnknownColumn {
                table: self.name.clone(),
                column: self.primary_key.clone(),
            });
        }
        Ok(())
    }

    /// Checks that every column of `row` exists and carries a value of the
    /// declared type.
    pub fn check_row(&self, row: &Row) -> CoreResult<()> {
        for (column, value) in row.columns() {
            let def = self
                .column_def(column)
                .ok_or_else(|| CoreError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                })?;
            if let Some(actual) = value.column_type() {
                if actual != def.ty {
                    return Err(CoreError::TypeMismatch {
                        table: self.name.clone(),
                        column: column.to_string(),
                        expected: def.ty,
                        actual: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Extracts the primary key of `row`, rejecting a missing or null key.
    pub fn key_of(&self, row: &Row) -> CoreResult<Value> {
        let pk = row.get(&self.primary_key);
        if pk.is_null() {
            return Err(CoreError::constraint_violation(
                &self.name,
                crate::constraint::PRIMARY,
                format!("column '{}' cannot be null", self.primary_key),
            ));
        }
        Ok(pk.clone())
    }
}

/// Registry of tables.
#[derive(Debug, Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    by_id: HashMap<TableId, Arc<TableSchema>>,
    by_name: HashMap<String, TableId>,
    next_id: u32,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table and returns its id.
    pub fn create(&self, schema: TableSchema) -> CoreResult<TableId> {
        schema.validate_definition()?;
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(schema.name()) {
            return Err(CoreError::TableExists {
                name: schema.name().to_string(),
            });
        }
        inner.next_id += 1;
        let id = TableId::new(inner.next_id);
        inner.by_name.insert(schema.name().to_string(), id);
        inner.by_id.insert(id, Arc::new(schema));
        Ok(id)
    }

    /// Resolves a table name.
    pub fn lookup(&self, name: &str) -> CoreResult<TableId> {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    /// Returns the schema of a table.
    pub fn schema(&self, id: TableId) -> CoreResult<Arc<TableSchema>> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown_table(id))
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Returns true if no table exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
