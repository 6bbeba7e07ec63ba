//! PostgreSQL driver adapter over the blocking `postgres` client.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use postgres::types::ToSql;
use postgres::{Client, NoTls};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::dialect::{validate_identifier, Dialect};
use crate::driver::{Connection, Statement};
use crate::error::DriverError;
use crate::schema::PropType;
use crate::value::SqlValue;

pub struct PostgresConnection {
    client: RefCell<Client>,
    tx_open: Cell<bool>,
    /// Sequences already created through `next_value` on this connection.
    sequences: RefCell<HashSet<String>>,
}

impl PostgresConnection {
    /// Connect using a conninfo string
    /// (`host=... port=... dbname=... user=... password=...`).
    pub fn connect(dsn: &str) -> Result<Self, DriverError> {
        let client = Client::connect(dsn, NoTls).map_err(DriverError::from)?;
        Ok(PostgresConnection {
            client: RefCell::new(client),
            tx_open: Cell::new(false),
            sequences: RefCell::new(HashSet::new()),
        })
    }
}

impl Connection for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn in_transaction(&self) -> bool {
        self.tx_open.get()
    }

    fn begin(&self) -> Result<bool, DriverError> {
        if self.tx_open.get() {
            return Ok(true);
        }
        self.client
            .borrow_mut()
            .batch_execute("BEGIN")
            .map_err(DriverError::from)?;
        self.tx_open.set(true);
        Ok(true)
    }

    fn commit(&self) -> Result<bool, DriverError> {
        if !self.tx_open.get() {
            return Ok(false);
        }
        self.client
            .borrow_mut()
            .batch_execute("COMMIT")
            .map_err(DriverError::from)?;
        self.tx_open.set(false);
        Ok(true)
    }

    fn rollback(&self) {
        if !self.tx_open.get() {
            return;
        }
        if let Err(e) = self.client.borrow_mut().batch_execute("ROLLBACK") {
            tracing::warn!(error = %e, "postgres rollback failed");
        }
        self.tx_open.set(false);
    }

    fn exec_ddl(&self, sql: &str) -> Result<(), DriverError> {
        self.client
            .borrow_mut()
            .batch_execute(sql)
            .map_err(DriverError::from)
    }

    fn prepare<'c>(
        &'c self,
        sql: &str,
        expected_params: usize,
    ) -> Result<Box<dyn Statement + 'c>, DriverError> {
        let stmt = self
            .client
            .borrow_mut()
            .prepare(sql)
            .map_err(DriverError::from)?;
        if stmt.params().len() != expected_params {
            return Err(DriverError(format!(
                "statement expects {} parameters, caller planned {}",
                stmt.params().len(),
                expected_params
            )));
        }
        let mut params = Vec::with_capacity(expected_params);
        params.resize_with(expected_params, || None);
        Ok(Box::new(PostgresStatement {
            conn: self,
            stmt,
            params,
        }))
    }

    fn next_value(&self, sequence: &str) -> Result<i64, DriverError> {
        validate_identifier(sequence).map_err(|e| DriverError(e.to_string()))?;
        if !self.sequences.borrow().contains(sequence) {
            self.client
                .borrow_mut()
                .batch_execute(&format!("CREATE SEQUENCE IF NOT EXISTS {}", sequence))
                .map_err(DriverError::from)?;
            self.sequences.borrow_mut().insert(sequence.to_string());
        }
        let row = self
            .client
            .borrow_mut()
            .query_one(&format!("SELECT nextval('{}')", sequence), &[])
            .map_err(DriverError::from)?;
        Ok(row.get(0))
    }
}

pub struct PostgresStatement<'c> {
    conn: &'c PostgresConnection,
    stmt: postgres::Statement,
    params: Vec<Option<Box<dyn ToSql + Sync>>>,
}

/// Encode a typed value into a native parameter. Dates and times bind as
/// `chrono` values, binary as `BYTEA`, JSON as a `json` parameter (string
/// payloads are parsed so the document text is bound as-is).
fn encode(value: &SqlValue, ty: PropType) -> Box<dyn ToSql + Sync> {
    match value {
        SqlValue::Null => null_of(ty),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Json(doc) => match doc {
            serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(parsed) => Box::new(parsed),
                Err(_) => Box::new(serde_json::Value::String(s.clone())),
            },
            other => Box::new(other.clone()),
        },
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::Timestamp(ts) => Box::new(*ts),
    }
}

/// A typed NULL so the parameter matches the statement's declared type.
fn null_of(ty: PropType) -> Box<dyn ToSql + Sync> {
    match ty {
        PropType::String => Box::new(None::<String>),
        PropType::Integer => Box::new(None::<i64>),
        PropType::Number => Box::new(None::<f64>),
        PropType::Bool => Box::new(None::<bool>),
        PropType::Date => Box::new(None::<NaiveDate>),
        PropType::Time => Box::new(None::<NaiveTime>),
        PropType::DateTime => Box::new(None::<NaiveDateTime>),
        PropType::Timestamp => Box::new(None::<DateTime<Utc>>),
        PropType::Binary => Box::new(None::<Vec<u8>>),
        PropType::Json => Box::new(None::<serde_json::Value>),
    }
}

impl Statement for PostgresStatement<'_> {
    fn bind(&mut self, index: usize, value: &SqlValue, ty: PropType) -> Result<(), DriverError> {
        if index == 0 || index > self.params.len() {
            return Err(DriverError(format!(
                "bind index {} out of range 1..={}",
                index,
                self.params.len()
            )));
        }
        self.params[index - 1] = Some(encode(value, ty));
        Ok(())
    }

    fn exec(&mut self) -> Result<i32, DriverError> {
        let mut refs: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(self.params.len());
        for (i, p) in self.params.iter().enumerate() {
            match p {
                Some(p) => refs.push(p.as_ref()),
                None => {
                    return Err(DriverError(format!("parameter {} was never bound", i + 1)));
                }
            }
        }
        let affected = self
            .conn
            .client
            .borrow_mut()
            .execute(&self.stmt, &refs)
            .map_err(DriverError::from)?;
        Ok(affected as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_encoding_is_typed() {
        // spot-check that typed NULLs produce distinct parameter types
        let p = null_of(PropType::Integer);
        assert!(format!("{:?}", p).contains("None"));
        let p = null_of(PropType::Timestamp);
        assert!(format!("{:?}", p).contains("None"));
    }
}
