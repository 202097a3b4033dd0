use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{CollaboratorError, Executor};
use crate::models::ResultSet;
use crate::sql::ValidatedSql;

pub const DEFAULT_ROW_CAP: usize = 10_000;

/// Runs validated SQL against a SQLite file opened read-only.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    database_path: PathBuf,
    row_cap: usize,
}

impl SqliteExecutor {
    #[must_use]
    pub fn new(database_path: &Path, row_cap: usize) -> Self {
        Self {
            database_path: database_path.to_path_buf(),
            row_cap: row_cap.max(1),
        }
    }

    #[must_use]
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn open(&self) -> Result<Connection, CollaboratorError> {
        if !self.database_path.is_file() {
            return Err(CollaboratorError::Execution(format!(
                "database not found: {}",
                self.database_path.display()
            )));
        }

        Connection::open_with_flags(
            &self.database_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|error| {
            CollaboratorError::Execution(format!(
                "failed to open database {}: {error}",
                self.database_path.display()
            ))
        })
    }
}

impl Executor for SqliteExecutor {
    fn execute(&self, sql: &ValidatedSql) -> Result<ResultSet, CollaboratorError> {
        let connection = self.open()?;
        let result = execute_read_only_query(&connection, sql, self.row_cap)?;
        info!(
            rows = result.row_count(),
            truncated = result.truncated,
            "query executed"
        );
        Ok(result)
    }
}

/// Collects at most `row_cap` rows; `truncated` is set when more were
/// available.
pub fn execute_read_only_query(
    connection: &Connection,
    sql: &ValidatedSql,
    row_cap: usize,
) -> Result<ResultSet, CollaboratorError> {
    let execution_error =
        |context: &str, error: rusqlite::Error| CollaboratorError::Execution(format!("{context}: {error}"));

    debug!(sql = %sql, row_cap, "executing query");
    let mut statement = connection
        .prepare(sql.as_str())
        .map_err(|error| execution_error("failed to prepare query", error))?;
    let columns = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let mut rows = statement
        .query([])
        .map_err(|error| execution_error("failed to execute query", error))?;
    let mut result_rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows
        .next()
        .map_err(|error| execution_error("failed to fetch query row", error))?
    {
        if result_rows.len() >= row_cap {
            truncated = true;
            break;
        }

        let mut cells = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value = row
                .get::<usize, SqlValue>(index)
                .map_err(|error| execution_error("failed to decode query column", error))?;
            cells.push(json_value_from_sql(value));
        }
        result_rows.push(cells);
    }

    Ok(ResultSet {
        columns,
        rows: result_rows,
        truncated,
    })
}

fn json_value_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => json!(value),
        SqlValue::Real(value) => json!(value),
        SqlValue::Text(value) => json!(value),
        SqlValue::Blob(value) => json!(encode_blob_hex(&value)),
    }
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}
