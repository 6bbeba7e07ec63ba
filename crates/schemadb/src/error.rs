//! Error types for the storage engine.

use thiserror::Error;

/// Schema document parsing and validation errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The document is structurally unusable (missing `properties`, bad
    /// identifier, malformed index declaration, ...).
    #[error("malformed schema: {0}")]
    Malformed(String),

    /// A property declares a `type` outside the fixed mapping table.
    #[error("unknown property type: {0}")]
    UnknownType(String),

    /// More than one property is marked as the primary key.
    #[error("duplicate primary key field: {0}")]
    DuplicateField(String),
}

/// Schema registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The exact `(name, version)` pair is already registered.
    #[error("schema {name} version {version} already exists")]
    DuplicateVersion { name: String, version: i32 },

    /// A new version must be strictly greater than the newest known one.
    #[error("schema {name} version {version} must be greater than the newest version {newest}")]
    VersionNotIncreasing {
        name: String,
        version: i32,
        newest: i32,
    },

    /// No schema is registered under this name.
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// The schema carries an empty name.
    #[error("schema name must not be empty")]
    InvalidName,
}

/// DDL execution errors.
#[derive(Error, Debug)]
pub enum DdlError {
    #[error("DDL execution failed: {0}")]
    ExecFailed(String),
}

/// DML generation errors. The generators are pure and signal by return.
#[derive(Error, Debug)]
pub enum DmlError {
    /// The operation requires a primary key but the schema declares none.
    #[error("schema {0} has no primary key")]
    NoPk(String),

    /// UPDATE with nothing but the PK in the payload.
    #[error("payload has no updatable fields")]
    NoUpdatableFields,

    /// The payload is an empty array or not an object at all.
    #[error("payload carries no sample object")]
    EmptyPayload,

    /// A column was referenced that the schema does not declare.
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

/// Write pipeline errors.
#[derive(Error, Debug)]
pub enum WriteError {
    /// UPDATE/DELETE row without a present and valid primary key.
    #[error("row is missing a valid primary key")]
    MissingPk,

    /// A JSON value cannot be bound under the declared property type.
    #[error("bind type mismatch for column {column}: {detail}")]
    BindTypeMismatch { column: String, detail: String },

    #[error("failed to begin transaction: {0}")]
    BeginFailed(String),

    #[error("failed to commit transaction: {0}")]
    CommitFailed(String),

    #[error("failed to prepare statement: {0}")]
    PrepareFailed(String),
}

/// Connection pool acquisition errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AcquireError {
    /// No connection became available within the timeout.
    #[error("timed out waiting for a pooled connection")]
    Timeout,

    /// The pool has been shut down; no further leases are handed out.
    #[error("pool is shut down")]
    Shutdown,
}

/// Id generator errors.
#[derive(Error, Debug)]
pub enum IdError {
    /// The wall clock moved backwards; refusing to mint ids.
    #[error("clock moved backwards by {0} ms")]
    ClockRegress(u64),

    /// The generator's output type does not match the PK column type.
    #[error("id kind {kind} cannot populate a {ty} primary key")]
    TypeMismatch { kind: String, ty: String },
}

/// Wraps a backend-specific failure with its driver message.
#[derive(Error, Debug)]
#[error("driver error: {0}")]
pub struct DriverError(pub String);

impl From<rusqlite::Error> for DriverError {
    fn from(e: rusqlite::Error) -> Self {
        DriverError(e.to_string())
    }
}

impl From<postgres::Error> for DriverError {
    fn from(e: postgres::Error) -> Self {
        DriverError(e.to_string())
    }
}

/// Top-level error for all public storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ddl(#[from] DdlError),

    #[error(transparent)]
    Dml(#[from] DmlError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Configuration error (invalid YAML/JSON, missing fields, ...).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
