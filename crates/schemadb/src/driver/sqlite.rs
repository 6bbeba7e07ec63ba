//! SQLite driver adapter over `rusqlite`.

use std::cell::Cell;

use rusqlite::types::Value as SqliteParam;

use crate::dialect::Dialect;
use crate::driver::{Connection, Statement};
use crate::error::DriverError;
use crate::schema::PropType;
use crate::value::SqlValue;

/// Backing table for `next_value`; SQLite has no native sequences.
const SEQUENCES_DDL: &str = "CREATE TABLE IF NOT EXISTS _schemadb_sequences(
 name TEXT PRIMARY KEY,
 value INTEGER NOT NULL
);";

pub struct SqliteConnection {
    conn: rusqlite::Connection,
    tx_open: Cell<bool>,
}

impl SqliteConnection {
    /// Open (and create if needed) the database at `dsn`; `:memory:` gives
    /// a private in-memory database.
    pub fn connect(dsn: &str) -> Result<Self, DriverError> {
        let conn = if dsn == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(dsn)
        }
        .map_err(DriverError::from)?;
        conn.execute_batch(SEQUENCES_DDL).map_err(DriverError::from)?;
        Ok(SqliteConnection {
            conn,
            tx_open: Cell::new(false),
        })
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn in_transaction(&self) -> bool {
        self.tx_open.get()
    }

    fn begin(&self) -> Result<bool, DriverError> {
        if self.tx_open.get() {
            return Ok(true);
        }
        self.conn.execute_batch("BEGIN").map_err(DriverError::from)?;
        self.tx_open.set(true);
        Ok(true)
    }

    fn commit(&self) -> Result<bool, DriverError> {
        if !self.tx_open.get() {
            return Ok(false);
        }
        self.conn.execute_batch("COMMIT").map_err(DriverError::from)?;
        self.tx_open.set(false);
        Ok(true)
    }

    fn rollback(&self) {
        if !self.tx_open.get() {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %e, "sqlite rollback failed");
        }
        self.tx_open.set(false);
    }

    fn exec_ddl(&self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql).map_err(DriverError::from)
    }

    fn prepare<'c>(
        &'c self,
        sql: &str,
        expected_params: usize,
    ) -> Result<Box<dyn Statement + 'c>, DriverError> {
        let stmt = self.conn.prepare(sql).map_err(DriverError::from)?;
        if stmt.parameter_count() != expected_params {
            return Err(DriverError(format!(
                "statement expects {} parameters, caller planned {}",
                stmt.parameter_count(),
                expected_params
            )));
        }
        Ok(Box::new(SqliteStatement { stmt }))
    }

    fn next_value(&self, sequence: &str) -> Result<i64, DriverError> {
        self.conn
            .query_row(
                "INSERT INTO _schemadb_sequences(name, value) VALUES (?1, 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1
                 RETURNING value",
                [sequence],
                |row| row.get(0),
            )
            .map_err(DriverError::from)
    }
}

pub struct SqliteStatement<'c> {
    stmt: rusqlite::Statement<'c>,
}

/// Encode a typed value per the SQLITE binding conventions: booleans as
/// integers 1/0, date/time/timestamp as ISO-8601 text, JSON canonically
/// serialized (strings pass through as-is).
fn encode(value: &SqlValue, _ty: PropType) -> SqliteParam {
    match value {
        SqlValue::Null => SqliteParam::Null,
        SqlValue::Bool(b) => SqliteParam::Integer(i64::from(*b)),
        SqlValue::I64(v) => SqliteParam::Integer(*v),
        SqlValue::F64(v) => SqliteParam::Real(*v),
        SqlValue::Text(s) => SqliteParam::Text(s.clone()),
        SqlValue::Bytes(b) => SqliteParam::Blob(b.clone()),
        SqlValue::Json(doc) => match doc {
            serde_json::Value::String(s) => SqliteParam::Text(s.clone()),
            other => SqliteParam::Text(other.to_string()),
        },
        SqlValue::Date(_) | SqlValue::Time(_) | SqlValue::DateTime(_) | SqlValue::Timestamp(_) => {
            match value.to_iso_string() {
                Some(s) => SqliteParam::Text(s),
                None => SqliteParam::Null,
            }
        }
    }
}

impl Statement for SqliteStatement<'_> {
    fn bind(&mut self, index: usize, value: &SqlValue, ty: PropType) -> Result<(), DriverError> {
        self.stmt
            .raw_bind_parameter(index, encode(value, ty))
            .map_err(DriverError::from)
    }

    fn exec(&mut self) -> Result<i32, DriverError> {
        let affected = self.stmt.raw_execute().map_err(DriverError::from)?;
        Ok(affected as i32)
    }
}
