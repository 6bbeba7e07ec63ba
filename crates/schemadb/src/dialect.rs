//! SQL dialect selection and dialect-dependent syntax.
//!
//! Only two engines exist and no third is planned, so the dialect is a
//! closed enum and the generators branch on it directly instead of going
//! through virtual dispatch.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// The closed set of supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded, file-backed engine.
    Sqlite,
    /// Networked engine.
    Postgres,
}

impl Dialect {
    /// Lowercase dialect label, for logs and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// 1-based positional parameter placeholder: `?N` or `$N`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Postgres => format!("${}", index),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}

/// Maximum identifier length (conservative limit across both engines).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate a table or column identifier.
///
/// Identifiers cannot be parameterized in prepared statements, so the
/// generators interpolate them into SQL text. Restricting them to
/// `[A-Za-z_][A-Za-z0-9_]*` at load time makes that interpolation safe
/// without quoting.
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(SchemaError::Malformed(format!(
            "identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| SchemaError::Malformed("identifier is empty".into()))?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(SchemaError::Malformed(format!(
            "identifier must start with a letter or underscore: {:?}",
            name
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(SchemaError::Malformed(format!(
            "identifier contains invalid character {:?}: {:?}",
            bad, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_styles() {
        assert_eq!(Dialect::Sqlite.placeholder(1), "?1");
        assert_eq!(Dialect::Sqlite.placeholder(12), "?12");
        assert_eq!(Dialect::Postgres.placeholder(1), "$1");
        assert_eq!(Dialect::Postgres.placeholder(10), "$10");
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("pg".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("col_2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1col").is_err());
        assert!(validate_identifier("bad-name").is_err());
        assert!(validate_identifier("drop table;").is_err());
        assert!(validate_identifier(&"x".repeat(200)).is_err());
    }
}
