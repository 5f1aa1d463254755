//! Module: db::storage
//! Responsibility: the statement seam between the session and a relational
//! backend, plus an in-memory backend.
//! Does not own: connections, transactions, or dialect-specific SQL.
//!
//! Invariants:
//! - Values never appear in SQL text; every value is a bound parameter.
//! - Parameters are already converted to storage form.

mod memory;


use crate::{
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    value::Value,
};
use derive_more::Deref;
use std::fmt::Write as _;
use thiserror::Error as ThisError;

// re-exports
pub use memory::MemoryStorage;

///
/// StorageError
///

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("statement binds {found} parameters, expected {expected}")]
    ParameterCount { expected: usize, found: usize },

    #[error("unknown table '{0}'")]
    UnknownTable(String),
}

impl From<StorageError> for InternalError {
    fn from(err: StorageError) -> Self {
        let class = match err {
            StorageError::Backend(_) => ErrorClass::Internal,
            StorageError::ParameterCount { .. } => ErrorClass::InvariantViolation,
            StorageError::UnknownTable(_) => ErrorClass::NotFound,
        };

        Self::with_detail(class, ErrorOrigin::Storage, ErrorDetail::Storage(err))
    }
}

///
/// Row
/// One result row, values in select-column order.
///

#[derive(Clone, Debug, Default, Deref, Eq, PartialEq)]
pub struct Row(pub Vec<Value>);

///
/// Statement
///
/// Structured statement shape; `sql()` renders the text a relational
/// backend would prepare. Filters are conjunctions of column equalities.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    Select {
        table: String,
        columns: Vec<String>,
        filter: Vec<String>,
        params: Vec<Value>,
        limit: Option<usize>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        params: Vec<Value>,
    },
    /// `params` holds the SET values followed by the filter values.
    Update {
        table: String,
        set_columns: Vec<String>,
        filter: Vec<String>,
        params: Vec<Value>,
    },
    Delete {
        table: String,
        filter: Vec<String>,
        params: Vec<Value>,
    },
}

impl Statement {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// Bound parameters in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        match self {
            Self::Select { params, .. }
            | Self::Insert { params, .. }
            | Self::Update { params, .. }
            | Self::Delete { params, .. } => params,
        }
    }

    /// Number of `?` placeholders in the rendered SQL.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        match self {
            Self::Select { filter, .. } | Self::Delete { filter, .. } => filter.len(),
            Self::Insert { columns, .. } => columns.len(),
            Self::Update {
                set_columns,
                filter,
                ..
            } => set_columns.len() + filter.len(),
        }
    }

    /// Check that parameters line up with placeholders.
    pub fn validate(&self) -> Result<(), StorageError> {
        let expected = self.placeholder_count();
        let found = self.params().len();
        if expected == found {
            Ok(())
        } else {
            Err(StorageError::ParameterCount { expected, found })
        }
    }

    /// Render SQL text with `?` placeholders only.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::Select {
                table,
                columns,
                filter,
                limit,
                ..
            } => {
                let mut sql = format!("SELECT {} FROM {table}", columns.join(", "));
                write_where(&mut sql, filter);
                if let Some(limit) = limit {
                    // Writing into a String cannot fail.
                    let _ = write!(sql, " LIMIT {limit}");
                }
                sql
            }
            Self::Insert { table, columns, .. } => format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            ),
            Self::Update {
                table,
                set_columns,
                filter,
                ..
            } => {
                let mut sql = format!("UPDATE {table} SET {}", assignments(set_columns, ", "));
                write_where(&mut sql, filter);
                sql
            }
            Self::Delete { table, filter, .. } => {
                let mut sql = format!("DELETE FROM {table}");
                write_where(&mut sql, filter);
                sql
            }
        }
    }
}

fn assignments(columns: &[String], separator: &str) -> String {
    columns
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(separator)
}

fn write_where(sql: &mut String, filter: &[String]) {
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&assignments(filter, " AND "));
    }
}

///
/// StorageExecutor
///
/// Synchronous backend seam. `execute` returns rows for reads;
/// `execute_statement` returns the affected-row count for writes.
///

pub trait StorageExecutor {
    fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageError>;

    fn execute_statement(&mut self, statement: &Statement) -> Result<u64, StorageError>;
}
