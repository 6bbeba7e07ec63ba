//! Storage facade: the top-level API tying together the registry, the
//! generators, the pool and the drivers.
//!
//! The write pipeline prepares the INSERT and UPSERT forms once per call
//! and reuses them across the rows of an array payload. Per row, a
//! present-and-valid primary key routes to the UPSERT statement; an
//! absent or invalid one routes to INSERT with a freshly generated id
//! bound in the plan's PK slot.

mod bootstrap;

pub use bootstrap::{SCHEMA_CATALOG_JSON, SCHEMA_VERSIONS_JSON};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};

use crate::config::StorageConfig;
use crate::dialect::Dialect;
use crate::dml::{self, DmlStatement};
use crate::driver::{self, Connection};
use crate::error::{
    DdlError, DmlError, IdError, RegistryError, Result, StorageError, WriteError,
};
use crate::id::{uuid_v7, HighLowGenerator, SnowflakeGenerator};
use crate::pool::{ConnectionFactory, ConnectionPool, Intent, Lease, PoolStats};
use crate::registry::SchemaRegistry;
use crate::schema::{IdKind, PropType, Property, Schema};
use crate::value::SqlValue;
use crate::{ddl, migrate};

/// Deployment-wide sequence backing `DBSerial` ids.
const DB_SEQUENCE: &str = "db_seq";

const NULL: Value = Value::Null;

/// CRUD operation reported to the notification and audit hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operation::Insert => "insert",
            Operation::Upsert => "upsert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Sink invoked after a successful commit with `(schema_name, op)`.
pub type NotifyHook = Box<dyn Fn(&str, Operation) + Send + Sync>;

/// Audit sink invoked inside the write transaction for every row carrying
/// non-empty track info.
pub type AuditHook =
    Box<dyn Fn(&dyn Connection, &str, Operation, &Value, &str) -> Result<()> + Send + Sync>;

/// Top-level storage engine over one backend.
pub struct Storage {
    dialect: Dialect,
    pool: ConnectionPool,
    registry: SchemaRegistry,
    snowflake: SnowflakeGenerator,
    highlow: HighLowGenerator,
    notify: RwLock<Option<NotifyHook>>,
    audit: RwLock<Option<AuditHook>>,
    /// Persisted `schema_catalog` row ids, by schema name.
    catalog_ids: Mutex<HashMap<String, i64>>,
}

impl Storage {
    /// Open a storage engine with per-dialect defaults.
    pub fn new(dsn: impl Into<String>, dialect: Dialect) -> Result<Self> {
        Self::with_config(StorageConfig::new(dsn, dialect))
    }

    /// Open a storage engine from a full configuration.
    pub fn with_config(config: StorageConfig) -> Result<Self> {
        let dialect = config.dialect;
        Self::with_connection_factory(config, Box::new(move |dsn| driver::connect(dialect, dsn)))
    }

    /// Open a storage engine with a custom connection factory (tests and
    /// embedders with their own driver adapters).
    pub fn with_connection_factory(
        config: StorageConfig,
        factory: ConnectionFactory,
    ) -> Result<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(
            config.pool_capacity(),
            config.dsn.clone(),
            factory,
            config.acquire_policy(),
        )?;
        Ok(Storage {
            dialect: config.dialect,
            pool,
            registry: SchemaRegistry::new(),
            snowflake: SnowflakeGenerator::new(
                config.snowflake.worker_id,
                config.snowflake.datacenter_id,
            )?,
            highlow: HighLowGenerator::new(),
            notify: RwLock::new(None),
            audit: RwLock::new(None),
            catalog_ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Shut down the pool; in-flight leases stay valid until dropped.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Install the post-commit notification sink.
    pub fn set_notify_hook(&self, hook: NotifyHook) {
        *self.notify.write() = Some(hook);
    }

    /// Install the audit sink fired for rows with non-empty track info.
    pub fn set_audit_hook(&self, hook: AuditHook) {
        *self.audit.write() = Some(hook);
    }

    /// Run `f` on a pooled connection, releasing the lease afterwards.
    pub fn with_conn<T>(
        &self,
        intent: Intent,
        f: impl FnOnce(&dyn Connection) -> Result<T>,
    ) -> Result<T> {
        let lease = self.pool.acquire(intent, None)?;
        f(lease.conn())
    }

    /// Run `f` inside a transaction on a pooled connection; commits on
    /// success, rolls back on error or commit failure.
    pub fn with_tx<T>(
        &self,
        intent: Intent,
        f: impl FnOnce(&dyn Connection) -> Result<T>,
    ) -> Result<T> {
        let lease = self.pool.acquire(intent, None)?;
        let conn = lease.conn();
        conn.begin()
            .map_err(|e| WriteError::BeginFailed(e.to_string()))?;
        match f(conn) {
            Ok(value) => match conn.commit() {
                Ok(_) => Ok(value),
                Err(e) => {
                    conn.rollback();
                    Err(WriteError::CommitFailed(e.to_string()).into())
                }
            },
            Err(e) => {
                conn.rollback();
                Err(e)
            }
        }
    }

    /// Execute raw DDL on a write connection.
    pub fn exec_ddl(&self, sql: &str) -> Result<()> {
        self.with_conn(Intent::Write, |conn| {
            conn.exec_ddl(sql)
                .map_err(|e| DdlError::ExecFailed(e.to_string()).into())
        })
    }

    /// Create the meta tables and seed one catalog and one version row
    /// per meta-schema, all in a single write transaction.
    pub fn init_catalog(&self) -> Result<()> {
        self.with_tx(Intent::Write, |conn| {
            for source in [SCHEMA_CATALOG_JSON, SCHEMA_VERSIONS_JSON] {
                let schema = Schema::from_str(source)?;
                let name = schema.name.clone();
                if !self.registry.has(&name) {
                    self.registry.add(schema)?;
                }
                self.resolve_schema_on(conn, &name)?;
            }
            for source in [SCHEMA_CATALOG_JSON, SCHEMA_VERSIONS_JSON] {
                let schema = Schema::from_str(source)?;
                self.persist_schema_rows(conn, &schema.name, schema.version, source, true)?;
            }
            tracing::info!("catalog initialized");
            Ok(())
        })
    }

    /// Register a schema version. With a connection, also insert its
    /// catalog and version rows within the caller's transaction.
    pub fn add_schema(&self, source: &str, conn: Option<&dyn Connection>) -> Result<()> {
        let schema = Schema::from_str(source)?;
        let name = schema.name.clone();
        let version = schema.version;
        self.registry.add(schema)?;
        if let Some(conn) = conn {
            self.persist_schema_rows(conn, &name, version, source, false)?;
        }
        Ok(())
    }

    /// Resolve the active schema for `name`, applying any pending forward
    /// migrations (DDL evolution only).
    pub fn get_schema(&self, name: &str) -> Result<Arc<Schema>> {
        let mut lease: Option<Lease> = None;
        let got = self.registry.get(name, |from, to| -> Result<()> {
            if lease.is_none() {
                lease = Some(self.pool.acquire(Intent::Write, None)?);
            }
            // just populated above
            let conn = lease.as_ref().unwrap().conn();
            self.apply_migration(conn, from, to)
        })?;
        got.ok_or_else(|| RegistryError::UnknownSchema(name.to_string()).into())
    }

    /// Insert (or upsert, per row) a payload into the named schema.
    /// Returns affected rows.
    pub fn insert(&self, name: &str, payload: &Value, track_info: &str) -> Result<i32> {
        let schema = self.get_schema(name)?;
        let affected = self.with_tx(Intent::Write, |conn| {
            self.insert_rows(conn, &schema, payload, track_info)
        })?;
        self.emit_notification(name, Operation::Insert);
        Ok(affected)
    }

    /// Update rows by primary key. Every row must carry a valid PK.
    pub fn update(&self, name: &str, payload: &Value, track_info: &str) -> Result<i32> {
        let schema = self.get_schema(name)?;
        let affected = self.with_tx(Intent::Write, |conn| {
            self.update_rows(conn, &schema, payload, track_info)
        })?;
        self.emit_notification(name, Operation::Update);
        Ok(affected)
    }

    /// Delete rows by primary key. Every row must carry a valid PK.
    pub fn delete(&self, name: &str, payload: &Value, track_info: &str) -> Result<i32> {
        let schema = self.get_schema(name)?;
        let affected = self.with_tx(Intent::Write, |conn| {
            self.delete_rows(conn, &schema, payload, track_info)
        })?;
        self.emit_notification(name, Operation::Delete);
        Ok(affected)
    }

    /// Insert on a caller-supplied connection. The caller controls the
    /// transaction; nothing is committed and no notification fires.
    pub fn insert_on(
        &self,
        conn: &dyn Connection,
        name: &str,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let schema = self.resolve_schema_on(conn, name)?;
        self.insert_rows(conn, &schema, payload, track_info)
    }

    /// Update on a caller-supplied connection; see [`Storage::insert_on`].
    pub fn update_on(
        &self,
        conn: &dyn Connection,
        name: &str,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let schema = self.resolve_schema_on(conn, name)?;
        self.update_rows(conn, &schema, payload, track_info)
    }

    /// Delete on a caller-supplied connection; see [`Storage::insert_on`].
    pub fn delete_on(
        &self,
        conn: &dyn Connection,
        name: &str,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let schema = self.resolve_schema_on(conn, name)?;
        self.delete_rows(conn, &schema, payload, track_info)
    }

    // ---- internal write engine (never commits; the caller owns the tx) ----

    /// Apply one migration step on `conn`: full DDL on first application,
    /// a planned ALTER batch afterwards. Uses its own transaction unless
    /// the caller already opened one.
    fn apply_migration(
        &self,
        conn: &dyn Connection,
        from: Option<&Schema>,
        to: &Schema,
    ) -> Result<()> {
        let batch = match from {
            None => ddl::emit(to, self.dialect),
            Some(old) => migrate::plan(old, to, self.dialect).join("\n"),
        };

        let owns_tx = !conn.in_transaction();
        if owns_tx {
            conn.begin()
                .map_err(|e| WriteError::BeginFailed(e.to_string()))?;
        }
        let applied = self.apply_migration_in_tx(conn, to, &batch);
        match applied {
            Ok(()) => {
                if owns_tx {
                    conn.commit()
                        .map_err(|e| WriteError::CommitFailed(e.to_string()))?;
                }
                Ok(())
            }
            Err(e) => {
                if owns_tx {
                    conn.rollback();
                }
                Err(e)
            }
        }
    }

    fn apply_migration_in_tx(
        &self,
        conn: &dyn Connection,
        to: &Schema,
        batch: &str,
    ) -> Result<()> {
        if !batch.is_empty() {
            conn.exec_ddl(batch)
                .map_err(|e| DdlError::ExecFailed(e.to_string()))?;
        }
        // Flip the persisted flags when this schema has catalog rows.
        let catalog_id = self.catalog_ids.lock().get(&to.name).copied();
        if let Some(id) = catalog_id {
            self.exec_params(
                conn,
                &format!(
                    "UPDATE schema_versions SET applied = true WHERE schema_id = {} AND version = {};",
                    self.dialect.placeholder(1),
                    self.dialect.placeholder(2)
                ),
                &[SqlValue::I64(id), SqlValue::I64(to.version as i64)],
            )?;
            self.exec_params(
                conn,
                &format!(
                    "UPDATE schema_catalog SET current_version = {}, updated_at = CURRENT_TIMESTAMP WHERE id = {};",
                    self.dialect.placeholder(1),
                    self.dialect.placeholder(2)
                ),
                &[SqlValue::I64(to.version as i64), SqlValue::I64(id)],
            )?;
        }
        Ok(())
    }

    /// Resolve a schema, driving migrations on the supplied connection
    /// (used inside `init_catalog`'s transaction).
    fn resolve_schema_on(&self, conn: &dyn Connection, name: &str) -> Result<Arc<Schema>> {
        let got = self
            .registry
            .get(name, |from, to| self.apply_migration(conn, from, to))?;
        got.ok_or_else(|| RegistryError::UnknownSchema(name.to_string()).into())
    }

    /// Insert one catalog row (upserted by name) and one version row for
    /// a schema.
    fn persist_schema_rows(
        &self,
        conn: &dyn Connection,
        name: &str,
        version: i32,
        source: &str,
        applied: bool,
    ) -> Result<()> {
        let catalog_id = {
            let cached = self.catalog_ids.lock().get(name).copied();
            match cached {
                Some(id) => id,
                None => {
                    let id = conn.next_value(DB_SEQUENCE).map_err(StorageError::from)?;
                    self.catalog_ids.lock().insert(name.to_string(), id);
                    id
                }
            }
        };

        self.exec_params(
            conn,
            &format!(
                "INSERT INTO schema_catalog (id, name, current_version) VALUES ({}, {}, {}) \
                 ON CONFLICT(name) DO UPDATE SET current_version = excluded.current_version, \
                 updated_at = CURRENT_TIMESTAMP;",
                self.dialect.placeholder(1),
                self.dialect.placeholder(2),
                self.dialect.placeholder(3)
            ),
            &[
                SqlValue::I64(catalog_id),
                SqlValue::Text(name.to_string()),
                SqlValue::I64(version as i64),
            ],
        )?;

        let versions_schema = self.resolve_schema_on(conn, "schema_versions")?;
        let version_id = conn.next_value(DB_SEQUENCE).map_err(StorageError::from)?;
        let row = json!({
            "id": version_id,
            "schema_id": catalog_id,
            "version": version,
            "applied": applied,
            "json": source,
        });
        self.insert_rows(conn, &versions_schema, &row, "")?;
        Ok(())
    }

    /// Prepare, bind and execute one statement with integer/text params.
    fn exec_params(&self, conn: &dyn Connection, sql: &str, params: &[SqlValue]) -> Result<i32> {
        let mut stmt = conn
            .prepare(sql, params.len())
            .map_err(|e| WriteError::PrepareFailed(e.to_string()))?;
        for (i, value) in params.iter().enumerate() {
            let ty = match value {
                SqlValue::Text(_) => PropType::String,
                _ => PropType::Integer,
            };
            stmt.bind(i + 1, value, ty).map_err(StorageError::from)?;
        }
        stmt.exec().map_err(StorageError::from)
    }

    fn insert_rows(
        &self,
        conn: &dyn Connection,
        schema: &Schema,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let insert_plan = dml::insert(schema, payload, self.dialect)?;
        let upsert_plan = match schema.pk() {
            Some(_) => Some(dml::upsert(schema, payload, self.dialect)?),
            None => None,
        };

        let mut insert_stmt = conn
            .prepare(&insert_plan.sql, insert_plan.binds.len())
            .map_err(|e| WriteError::PrepareFailed(e.to_string()))?;
        let mut upsert_stmt = match &upsert_plan {
            Some(plan) => Some(
                conn.prepare(&plan.sql, plan.binds.len())
                    .map_err(|e| WriteError::PrepareFailed(e.to_string()))?,
            ),
            None => None,
        };

        let pk = schema.pk();
        let mut affected = 0;
        for row in rows_of(payload)? {
            let pk_valid = pk.is_some_and(|pk| pk_present_and_valid(row, pk));

            let (plan, stmt, op) = if pk_valid {
                match (&upsert_plan, upsert_stmt.as_mut()) {
                    (Some(plan), Some(stmt)) => (plan, stmt, Operation::Upsert),
                    _ => (&insert_plan, &mut insert_stmt, Operation::Insert),
                }
            } else {
                (&insert_plan, &mut insert_stmt, Operation::Insert)
            };

            // Absent or invalid PK: mint a fresh id for the PK slot.
            let new_id = match (pk, pk_valid) {
                (Some(pk), false) => Some(self.generate_id(conn, schema, pk)?),
                _ => None,
            };

            for (i, slot) in plan.binds.iter().enumerate() {
                let value = match (&new_id, slot.pk) {
                    (Some(id), true) => id.clone(),
                    _ => SqlValue::from_json(
                        row.get(&slot.column).unwrap_or(&NULL),
                        slot.ty,
                        &slot.column,
                    )?,
                };
                stmt.bind(i + 1, &value, slot.ty)
                    .map_err(StorageError::from)?;
            }
            affected += stmt.exec().map_err(StorageError::from)?;
            self.audit_row(conn, schema, op, row, track_info)?;
        }
        Ok(affected)
    }

    fn update_rows(
        &self,
        conn: &dyn Connection,
        schema: &Schema,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let plan = dml::update(schema, payload, self.dialect)?;
        let pk = schema
            .pk()
            .ok_or_else(|| DmlError::NoPk(schema.name.clone()))?;

        let mut stmt = conn
            .prepare(&plan.sql, plan.binds.len())
            .map_err(|e| WriteError::PrepareFailed(e.to_string()))?;

        let mut affected = 0;
        for row in rows_of(payload)? {
            if !pk_present_and_valid(row, pk) {
                return Err(WriteError::MissingPk.into());
            }
            bind_row(&mut *stmt, &plan, row)?;
            affected += stmt.exec().map_err(StorageError::from)?;
            self.audit_row(conn, schema, Operation::Update, row, track_info)?;
        }
        Ok(affected)
    }

    fn delete_rows(
        &self,
        conn: &dyn Connection,
        schema: &Schema,
        payload: &Value,
        track_info: &str,
    ) -> Result<i32> {
        let plan = dml::delete(schema, self.dialect)?;
        let pk = schema
            .pk()
            .ok_or_else(|| DmlError::NoPk(schema.name.clone()))?;

        let mut stmt = conn
            .prepare(&plan.sql, plan.binds.len())
            .map_err(|e| WriteError::PrepareFailed(e.to_string()))?;

        let mut affected = 0;
        for row in rows_of(payload)? {
            if !pk_present_and_valid(row, pk) {
                return Err(WriteError::MissingPk.into());
            }
            bind_row(&mut *stmt, &plan, row)?;
            affected += stmt.exec().map_err(StorageError::from)?;
            self.audit_row(conn, schema, Operation::Delete, row, track_info)?;
        }
        Ok(affected)
    }

    /// Mint a primary key value for an INSERT-routed row. The generator's
    /// output type must match the PK column type.
    fn generate_id(
        &self,
        conn: &dyn Connection,
        schema: &Schema,
        pk: &Property,
    ) -> Result<SqlValue> {
        let mismatch = || {
            StorageError::from(IdError::TypeMismatch {
                kind: pk.id_kind.label().to_string(),
                ty: pk.ty.label().to_string(),
            })
        };
        match pk.id_kind {
            IdKind::UuidV7 => match pk.ty {
                PropType::String => Ok(SqlValue::Text(uuid_v7())),
                _ => Err(mismatch()),
            },
            IdKind::HighLow => match pk.ty {
                PropType::String => Ok(SqlValue::Text(self.highlow.next())),
                _ => Err(mismatch()),
            },
            IdKind::Snowflake => match pk.ty {
                PropType::Integer => Ok(SqlValue::I64(self.snowflake.next()?)),
                _ => Err(mismatch()),
            },
            IdKind::DbSerial => match pk.ty {
                PropType::Integer => Ok(SqlValue::I64(
                    conn.next_value(DB_SEQUENCE).map_err(StorageError::from)?,
                )),
                _ => Err(mismatch()),
            },
            IdKind::TbSerial => match pk.ty {
                PropType::Integer => Ok(SqlValue::I64(
                    conn.next_value(&format!("{}_seq", schema.name))
                        .map_err(StorageError::from)?,
                )),
                _ => Err(mismatch()),
            },
        }
    }

    fn audit_row(
        &self,
        conn: &dyn Connection,
        schema: &Schema,
        op: Operation,
        row: &Map<String, Value>,
        track_info: &str,
    ) -> Result<()> {
        if track_info.is_empty() {
            return Ok(());
        }
        if let Some(hook) = self.audit.read().as_ref() {
            hook(
                conn,
                &schema.name,
                op,
                &Value::Object(row.clone()),
                track_info,
            )
        } else {
            tracing::info!(schema = %schema.name, %op, track_info, "audited write");
            Ok(())
        }
    }

    fn emit_notification(&self, name: &str, op: Operation) {
        if let Some(hook) = self.notify.read().as_ref() {
            hook(name, op);
        }
    }
}

/// The payload's rows: every element of an array, or the single object.
fn rows_of(payload: &Value) -> Result<Vec<&Map<String, Value>>> {
    match payload {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(DmlError::EmptyPayload.into());
            }
            items
                .iter()
                .map(|v| {
                    v.as_object()
                        .ok_or(StorageError::Dml(DmlError::EmptyPayload))
                })
                .collect()
        }
        Value::Object(obj) => Ok(vec![obj]),
        _ => Err(DmlError::EmptyPayload.into()),
    }
}

/// PK validity: numeric PKs need a non-zero number, string PKs a
/// non-empty string; other types only need a non-null value.
fn pk_present_and_valid(row: &Map<String, Value>, pk: &Property) -> bool {
    let Some(value) = row.get(&pk.name) else {
        return false;
    };
    match pk.ty {
        PropType::Integer => value.as_i64().is_some_and(|n| n != 0),
        PropType::Number => value.as_f64().is_some_and(|n| n != 0.0),
        PropType::String => value.as_str().is_some_and(|s| !s.is_empty()),
        _ => !value.is_null(),
    }
}

/// Bind every slot of `plan` from `row` (used for UPDATE/DELETE, where
/// the PK value always comes from the row itself).
fn bind_row(
    stmt: &mut dyn crate::driver::Statement,
    plan: &DmlStatement,
    row: &Map<String, Value>,
) -> Result<()> {
    for (i, slot) in plan.binds.iter().enumerate() {
        let value = SqlValue::from_json(
            row.get(&slot.column).unwrap_or(&NULL),
            slot.ty,
            &slot.column,
        )?;
        stmt.bind(i + 1, &value, slot.ty)
            .map_err(StorageError::from)?;
    }
    Ok(())
}
