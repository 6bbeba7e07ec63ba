//! SQL value types and JSON-to-SQL conversion.
//!
//! The write pipeline converts each JSON value into a typed [`SqlValue`]
//! under the column's declared [`PropType`] before handing it to a driver
//! statement. Conversion failures surface as
//! [`WriteError::BindTypeMismatch`] with the offending column named.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;

use crate::error::WriteError;
use crate::schema::PropType;

/// A typed SQL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// JSON document; `Value::String` means the payload carried the JSON
    /// text directly and it is bound as-is.
    Json(Value),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Convert a JSON value under a declared property type.
    pub fn from_json(value: &Value, ty: PropType, column: &str) -> Result<SqlValue, WriteError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let mismatch = |detail: &str| WriteError::BindTypeMismatch {
            column: column.to_string(),
            detail: detail.to_string(),
        };

        match ty {
            PropType::String => value
                .as_str()
                .map(|s| SqlValue::Text(s.to_string()))
                .ok_or_else(|| mismatch("expected a JSON string")),
            PropType::Integer => value
                .as_i64()
                .map(SqlValue::I64)
                .ok_or_else(|| mismatch("expected a JSON integer")),
            PropType::Number => value
                .as_f64()
                .map(SqlValue::F64)
                .ok_or_else(|| mismatch("expected a JSON number")),
            PropType::Bool => value
                .as_bool()
                .map(SqlValue::Bool)
                .ok_or_else(|| mismatch("expected a JSON boolean")),
            PropType::Date => {
                let s = value.as_str().ok_or_else(|| mismatch("expected an ISO-8601 date string"))?;
                s.parse::<NaiveDate>()
                    .map(SqlValue::Date)
                    .map_err(|e| mismatch(&format!("invalid date {:?}: {}", s, e)))
            }
            PropType::Time => {
                let s = value.as_str().ok_or_else(|| mismatch("expected an ISO-8601 time string"))?;
                s.parse::<NaiveTime>()
                    .map(SqlValue::Time)
                    .map_err(|e| mismatch(&format!("invalid time {:?}: {}", s, e)))
            }
            PropType::DateTime => {
                let s = value
                    .as_str()
                    .ok_or_else(|| mismatch("expected an ISO-8601 datetime string"))?;
                parse_datetime(s)
                    .map(SqlValue::DateTime)
                    .ok_or_else(|| mismatch(&format!("invalid datetime {:?}", s)))
            }
            PropType::Timestamp => {
                let s = value
                    .as_str()
                    .ok_or_else(|| mismatch("expected an RFC 3339 timestamp string"))?;
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| SqlValue::Timestamp(dt.with_timezone(&Utc)))
                    .map_err(|e| mismatch(&format!("invalid timestamp {:?}: {}", s, e)))
            }
            PropType::Binary => {
                let s = value.as_str().ok_or_else(|| mismatch("expected a hex string"))?;
                decode_hex(s)
                    .map(SqlValue::Bytes)
                    .ok_or_else(|| mismatch(&format!("invalid hex payload {:?}", s)))
            }
            // Strings are bound as-is; everything else serializes canonically.
            PropType::Json => Ok(SqlValue::Json(value.clone())),
        }
    }

    /// Render date/time values as ISO-8601 text, for text-affinity engines.
    pub fn to_iso_string(&self) -> Option<String> {
        match self {
            SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::Timestamp(ts) => Some(ts.to_rfc3339()),
            _ => None,
        }
    }
}

/// Accept `T` or space separated date/time.
fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    s.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Decode hex text with an optional `\x` prefix (the POSTGRES bytea form).
fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("\\x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
