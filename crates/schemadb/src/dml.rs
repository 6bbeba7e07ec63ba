//! DML generation: INSERT / UPSERT / UPDATE / DELETE plus bind plans.
//!
//! Statements are built from the column set of a *sample object*: the
//! first object of a payload array, or the payload itself. Columns are
//! selected in JSON key order; unknown keys are ignored. Placeholders are
//! `?N` (SQLITE) or `$N` (POSTGRES), 1-based and strictly ascending.

use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::DmlError;
use crate::schema::{PropType, Property, Schema};

/// One slot of the bind plan: placeholder position is the slot's index + 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSlot {
    pub column: String,
    pub ty: PropType,
    /// This slot binds the primary key.
    pub pk: bool,
}

/// Generated SQL together with its ordered parameter plan.
#[derive(Debug, Clone)]
pub struct DmlStatement {
    pub sql: String,
    pub binds: Vec<BindSlot>,
}

impl DmlStatement {
    /// Number of positional parameters the statement expects.
    pub fn expected_params(&self) -> i32 {
        self.binds.len() as i32
    }

    /// Index (1-based) of the primary key slot, if the plan has one.
    pub fn pk_slot(&self) -> Option<usize> {
        self.binds.iter().position(|b| b.pk).map(|i| i + 1)
    }
}

/// The sample object defining the column set: the first element of an
/// array payload, or the payload itself.
pub fn sample_object(payload: &Value) -> Result<&serde_json::Map<String, Value>, DmlError> {
    match payload {
        Value::Array(items) => items
            .first()
            .and_then(Value::as_object)
            .ok_or(DmlError::EmptyPayload),
        Value::Object(obj) => Ok(obj),
        _ => Err(DmlError::EmptyPayload),
    }
}

fn slot(prop: &Property, pk: bool) -> BindSlot {
    BindSlot {
        column: prop.name.clone(),
        ty: prop.ty,
        pk,
    }
}

/// Generate an INSERT from the sample's column set.
///
/// Columns follow JSON key order. When the schema has a PK and the sample
/// lacks it, the PK column is appended last so the generated id is bound
/// in the trailing slot.
pub fn insert(schema: &Schema, payload: &Value, dialect: Dialect) -> Result<DmlStatement, DmlError> {
    let obj = sample_object(payload)?;
    let pk = schema.pk();

    let mut names: Vec<&str> = Vec::new();
    let mut placeholders: Vec<String> = Vec::new();
    let mut binds: Vec<BindSlot> = Vec::new();
    let mut pk_in_payload = false;

    for key in obj.keys() {
        let Some(prop) = schema.properties.get(key) else {
            continue; // unknown keys are ignored
        };
        let is_pk = pk.is_some_and(|p| p.name == prop.name);
        pk_in_payload |= is_pk;
        names.push(&prop.name);
        placeholders.push(dialect.placeholder(binds.len() + 1));
        binds.push(slot(prop, is_pk));
    }

    if let Some(pk) = pk {
        if !pk_in_payload {
            names.push(&pk.name);
            placeholders.push(dialect.placeholder(binds.len() + 1));
            binds.push(slot(pk, true));
        }
    }

    if names.is_empty() {
        return Err(DmlError::EmptyPayload);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        schema.name,
        names.join(", "),
        placeholders.join(", ")
    );
    Ok(DmlStatement { sql, binds })
}

/// Generate an UPSERT: the INSERT column set plus an `ON CONFLICT` clause
/// updating every non-PK selected column (`DO NOTHING` when the PK is the
/// only column).
pub fn upsert(schema: &Schema, payload: &Value, dialect: Dialect) -> Result<DmlStatement, DmlError> {
    let pk = schema
        .pk()
        .ok_or_else(|| DmlError::NoPk(schema.name.clone()))?;

    let base = insert(schema, payload, dialect)?;
    let sets: Vec<String> = base
        .binds
        .iter()
        .filter(|b| !b.pk)
        .map(|b| format!("{} = excluded.{}", b.column, b.column))
        .collect();

    let insert_body = base.sql.trim_end_matches(';');
    let sql = if sets.is_empty() {
        format!("{} ON CONFLICT({}) DO NOTHING;", insert_body, pk.name)
    } else {
        format!(
            "{} ON CONFLICT({}) DO UPDATE SET {};",
            insert_body,
            pk.name,
            sets.join(", ")
        )
    };
    Ok(DmlStatement {
        sql,
        binds: base.binds,
    })
}

/// Generate an UPDATE: `SET` clauses for the non-PK selected columns in
/// JSON key order, with the PK bound in the final slot of the WHERE.
pub fn update(schema: &Schema, payload: &Value, dialect: Dialect) -> Result<DmlStatement, DmlError> {
    let obj = sample_object(payload)?;
    let pk = schema
        .pk()
        .ok_or_else(|| DmlError::NoPk(schema.name.clone()))?;

    let mut sets: Vec<String> = Vec::new();
    let mut binds: Vec<BindSlot> = Vec::new();

    for key in obj.keys() {
        let Some(prop) = schema.properties.get(key) else {
            continue;
        };
        if prop.name == pk.name {
            continue;
        }
        sets.push(format!(
            "{} = {}",
            prop.name,
            dialect.placeholder(binds.len() + 1)
        ));
        binds.push(slot(prop, false));
    }

    if sets.is_empty() {
        return Err(DmlError::NoUpdatableFields);
    }

    let where_ph = dialect.placeholder(binds.len() + 1);
    binds.push(slot(pk, true));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {};",
        schema.name,
        sets.join(", "),
        pk.name,
        where_ph
    );
    Ok(DmlStatement { sql, binds })
}

/// Generate a DELETE by primary key; the PK is the only parameter.
pub fn delete(schema: &Schema, dialect: Dialect) -> Result<DmlStatement, DmlError> {
    let pk = schema
        .pk()
        .ok_or_else(|| DmlError::NoPk(schema.name.clone()))?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = {};",
        schema.name,
        pk.name,
        dialect.placeholder(1)
    );
    Ok(DmlStatement {
        sql,
        binds: vec![slot(pk, true)],
    })
}
