use crate::{
    db::storage::{Row, Statement, StorageError, StorageExecutor},
    value::Value,
};
use std::collections::BTreeMap;

type StoredRow = BTreeMap<String, Value>;

///
/// MemoryStorage
///
/// Schemaless in-memory tables keyed by name. Rows are column → value maps;
/// missing columns read as `Null`. Equality filters follow SQL semantics, so
/// `NULL` never matches. Every executed statement is logged.
///

#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: BTreeMap<String, Vec<StoredRow>>,
    log: Vec<Statement>,
    fail_next: Option<String>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an empty table. Statements against undeclared tables fail.
    pub fn create_table(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default();
    }

    /// Fail the next executed statement with a backend error.
    pub fn fail_next(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Equivalent of `SELECT column FROM table LIMIT 1`, without logging.
    #[must_use]
    pub fn fetch_one(&self, table: &str, column: &str) -> Option<Value> {
        self.tables
            .get(table)?
            .first()
            .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }

    /// Executed statements, oldest first.
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Vec<StoredRow>, StorageError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }

    // Phase 1 of every call: validate shape, log, consume injected failure.
    fn begin(&mut self, statement: &Statement) -> Result<(), StorageError> {
        statement.validate()?;
        self.log.push(statement.clone());

        match self.fail_next.take() {
            Some(message) => Err(StorageError::Backend(message)),
            None => Ok(()),
        }
    }
}

fn matches(row: &StoredRow, filter: &[String], params: &[Value]) -> bool {
    filter.iter().zip(params).all(|(column, param)| {
        !param.is_null() && row.get(column).is_some_and(|value| value == param)
    })
}

impl StorageExecutor for MemoryStorage {
    fn execute(&mut self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        self.begin(statement)?;

        let Statement::Select {
            table,
            columns,
            filter,
            params,
            limit,
        } = statement
        else {
            return Err(StorageError::Backend(format!(
                "execute expects a SELECT, got: {}",
                statement.sql()
            )));
        };

        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.clone()))?;

        Ok(rows
            .iter()
            .filter(|row| matches(row, filter, params))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| {
                Row(columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect())
            })
            .collect())
    }

    fn execute_statement(&mut self, statement: &Statement) -> Result<u64, StorageError> {
        self.begin(statement)?;

        match statement {
            Statement::Select { .. } => Err(StorageError::Backend(format!(
                "execute_statement expects a write, got: {}",
                statement.sql()
            ))),
            Statement::Insert {
                table,
                columns,
                params,
            } => {
                let row = columns.iter().cloned().zip(params.iter().cloned()).collect();
                self.table_mut(table)?.push(row);

                Ok(1)
            }
            Statement::Update {
                table,
                set_columns,
                filter,
                params,
            } => {
                let (set_params, filter_params) = params.split_at(set_columns.len());
                let mut affected = 0;
                for row in self.table_mut(table)? {
                    if matches(row, filter, filter_params) {
                        for (column, value) in set_columns.iter().zip(set_params) {
                            row.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }

                Ok(affected)
            }
            Statement::Delete {
                table,
                filter,
                params,
            } => {
                let rows = self.table_mut(table)?;
                let before = rows.len();
                rows.retain(|row| !matches(row, filter, params));

                Ok((before - rows.len()) as u64)
            }
        }
    }
}
