//! # schemadb
//!
//! Schema-driven data access engine: JSON-Schema definitions in,
//! dialect-specific DDL and parameterized DML out.
//!
//! The engine ingests JSON-Schema documents, materializes tables and
//! indexes for them, and derives INSERT/UPSERT/UPDATE/DELETE statements
//! from runtime JSON payloads. It supports:
//!
//! - **Two dialects**: an embedded file-backed engine (SQLITE) and a
//!   networked engine (POSTGRES)
//! - **Versioned schemas** with tracked application state and on-demand
//!   forward migrations
//! - **A bounded connection pool** with intent-tagged, scoped leases and
//!   writer-priority fairness
//! - **A write pipeline** with transaction bracketing, per-row id
//!   generation and prepared-statement reuse across array payloads
//!
//! ## Example
//!
//! ```rust,no_run
//! use schemadb::{Dialect, Storage};
//! use serde_json::json;
//!
//! fn main() -> schemadb::Result<()> {
//!     let storage = Storage::new("./app.db", Dialect::Sqlite)?;
//!     storage.init_catalog()?;
//!     storage.add_schema(
//!         r#"{
//!             "name": "users",
//!             "required": ["name"],
//!             "properties": {
//!                 "id": {"type": "integer", "idprop": true, "idkind": "Snowflake"},
//!                 "name": {"type": "string"},
//!                 "age": {"type": "integer"}
//!             }
//!         }"#,
//!         None,
//!     )?;
//!     let rows = storage.insert("users", &json!({"name": "Alice", "age": 30}), "")?;
//!     println!("inserted {} rows", rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod driver;
pub mod error;
pub mod id;
pub mod migrate;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod value;

// Re-exports for convenient access
pub use config::{PoolConfig, SnowflakeConfig, StorageConfig};
pub use dialect::Dialect;
pub use dml::{BindSlot, DmlStatement};
pub use error::{
    AcquireError, DdlError, DmlError, DriverError, IdError, RegistryError, Result, SchemaError,
    StorageError, WriteError,
};
pub use pool::{AcquirePolicy, ConnectionPool, Intent, Lease, PoolStats};
pub use registry::{SchemaRegistry, SchemaVersion};
pub use schema::{CompositeIndex, DefaultKind, IdKind, PropType, Property, Schema};
pub use storage::{Operation, Storage};
pub use value::SqlValue;
