//! Connection and statement contracts implemented by the backend drivers.
//!
//! A connection is owned by exactly one thread at a time (the pool hands
//! it out through a [`Lease`](crate::pool::Lease)), and a transaction is
//! always associated with exactly one connection. Statements borrow their
//! connection and must be dropped before the transaction commits.

mod postgres;
mod sqlite;

pub use self::postgres::PostgresConnection;
pub use self::sqlite::SqliteConnection;

use crate::dialect::Dialect;
use crate::error::DriverError;
use crate::schema::PropType;
use crate::value::SqlValue;

/// A prepared statement with positional, 1-based parameter binding.
pub trait Statement {
    /// Bind one parameter. The declared property type selects the
    /// engine-specific encoding (e.g. booleans as integers on SQLITE).
    fn bind(&mut self, index: usize, value: &SqlValue, ty: PropType) -> Result<(), DriverError>;

    /// Execute with the current bindings; returns affected rows.
    fn exec(&mut self) -> Result<i32, DriverError>;
}

/// A live connection to one backend.
pub trait Connection: Send {
    fn dialect(&self) -> Dialect;

    /// True while a transaction is open on this connection.
    fn in_transaction(&self) -> bool;

    /// Open a transaction. A no-op when one is already active; `Ok(true)`
    /// means a transaction is open after the call.
    fn begin(&self) -> Result<bool, DriverError>;

    /// Commit the active transaction. `Ok(false)` when none is open.
    fn commit(&self) -> Result<bool, DriverError>;

    /// Roll back the active transaction; a no-op when none is open.
    fn rollback(&self);

    /// Execute a DDL batch (may contain multiple `;`-separated statements).
    fn exec_ddl(&self, sql: &str) -> Result<(), DriverError>;

    /// Prepare a DML statement for repeated bind/exec rounds.
    fn prepare<'c>(
        &'c self,
        sql: &str,
        expected_params: usize,
    ) -> Result<Box<dyn Statement + 'c>, DriverError>;

    /// Fetch the next value of a named sequence (single-column scalar
    /// read; the only read path).
    fn next_value(&self, sequence: &str) -> Result<i64, DriverError>;
}

/// Connect to a backend by dialect and DSN (SQLITE: file path or
/// `:memory:`; POSTGRES: conninfo string).
pub fn connect(dialect: Dialect, dsn: &str) -> Result<Box<dyn Connection>, DriverError> {
    match dialect {
        Dialect::Sqlite => Ok(Box::new(SqliteConnection::connect(dsn)?)),
        Dialect::Postgres => Ok(Box::new(PostgresConnection::connect(dsn)?)),
    }
}
