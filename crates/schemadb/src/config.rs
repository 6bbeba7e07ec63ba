//! Configuration loading and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Result, StorageError};
use crate::pool::AcquirePolicy;

/// Top-level storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLITE: database file path (or `:memory:`); POSTGRES: conninfo.
    pub dsn: String,
    pub dialect: Dialect,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub snowflake: SnowflakeConfig,
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pooled connections; defaults per dialect (1 for SQLITE,
    /// 8 for POSTGRES).
    pub capacity: Option<usize>,
    pub acquire_timeout_ms: u64,
    /// Lease-time guardrail in milliseconds; 0 disables it.
    pub max_lease_ms: u64,
    pub writer_priority: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: None,
            acquire_timeout_ms: 1500,
            max_lease_ms: 0,
            writer_priority: true,
        }
    }
}

/// Snowflake generator identity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowflakeConfig {
    pub worker_id: u64,
    pub datacenter_id: u64,
}

impl StorageConfig {
    /// A configuration with per-dialect defaults.
    pub fn new(dsn: impl Into<String>, dialect: Dialect) -> Self {
        StorageConfig {
            dsn: dsn.into(),
            dialect,
            pool: PoolConfig::default(),
            snowflake: SnowflakeConfig::default(),
        }
    }

    /// Load configuration from a file; `.json` parses as JSON, anything
    /// else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: StorageConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StorageConfig = serde_json::from_str(json)
            .map_err(|e| StorageError::Config(format!("failed to parse JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dsn.is_empty() {
            return Err(StorageError::Config("dsn must not be empty".into()));
        }
        if self.pool.capacity == Some(0) {
            return Err(StorageError::Config(
                "pool capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Effective pool capacity: the configured value, or the dialect
    /// default (one connection for SQLITE, several for POSTGRES).
    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity.unwrap_or(match self.dialect {
            Dialect::Sqlite => 1,
            Dialect::Postgres => 8,
        })
    }

    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy {
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            max_lease_time: Duration::from_millis(self.pool.max_lease_ms),
            writer_priority: self.pool.writer_priority,
        }
    }
}
