//! SQLite sales store
//!
//! Read-only collaborator over the relational sales database. Execution
//! failures are captured in the result, never raised to the workflow.

use crate::context::TableResult;
use crate::error::{CopilotError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

pub struct SqliteStore {
    // Connection is !Sync; the mutex makes concurrent batch reads safe.
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database read-only. A missing or unreadable file is a
    /// startup failure for the caller to surface.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| CopilotError::Store(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Human-readable table/column listing for the query generator.
    pub fn describe_schema(&self) -> Result<String> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name")?;
        let names: Vec<String> = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut sections = Vec::with_capacity(names.len());
        for name in &names {
            // PRAGMA does not support bound parameters; quote the name instead.
            let pragma = format!("PRAGMA table_info('{}')", name.replace('\'', "''"));
            let mut info = connection.prepare(&pragma)?;
            let columns: Vec<String> = info
                .query_map([], |row| {
                    Ok(format!(
                        "{} {}",
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?
                    ))
                })?
                .collect::<std::result::Result<_, _>>()?;
            sections.push(format!("Table: {}\nColumns: {}", name, columns.join(", ")));
        }
        Ok(sections.join("\n"))
    }

    /// Table names known to the store, used to resolve citation casing.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(names)
    }

    /// Execute a query and return its tabular result. All failures are
    /// captured into the result's `error` field with empty columns/rows.
    /// Row and column ordering is whatever the query defines.
    pub fn run(&self, sql: &str) -> TableResult {
        debug!("Executing query: {}", sql.trim());
        let connection = match self.lock() {
            Ok(connection) => connection,
            Err(e) => return TableResult::failure(e.to_string()),
        };
        match Self::run_on(&connection, sql) {
            Ok(result) => result,
            Err(e) => TableResult::failure(e.to_string()),
        }
    }

    fn run_on(connection: &Connection, sql: &str) -> Result<TableResult> {
        let mut statement = connection.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        let mut raw = statement.query([])?;
        while let Some(row) = raw.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(value_ref_to_json(row.get_ref(i)?));
            }
            rows.push(values);
        }
        Ok(TableResult::success(columns, rows))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| CopilotError::Store("store connection mutex poisoned".to_string()))
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(text) => {
            serde_json::Value::String(String::from_utf8_lossy(text).into_owned())
        }
        ValueRef::Blob(blob) => serde_json::Value::String(format!("<blob:{} bytes>", blob.len())),
    }
}
