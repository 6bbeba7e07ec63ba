//! JSON-Schema document parsing into the internal schema model.

use serde_json::Value;

use crate::dialect::validate_identifier;
use crate::error::SchemaError;
use crate::schema::model::{
    CompositeIndex, DefaultKind, DefaultValue, IdKind, PropType, Property, Schema,
};

impl Schema {
    /// Parse a JSON-Schema source string.
    pub fn from_str(source: &str) -> Result<Schema, SchemaError> {
        let doc: Value = serde_json::from_str(source)
            .map_err(|e| SchemaError::Malformed(format!("invalid JSON: {}", e)))?;
        let mut schema = Schema::from_json(&doc)?;
        schema.source_json = source.to_string();
        Ok(schema)
    }

    /// Parse an already-decoded JSON-Schema document.
    ///
    /// Property iteration order matches the JSON key order of the source
    /// document; that order later drives DML parameter order.
    pub fn from_json(doc: &Value) -> Result<Schema, SchemaError> {
        let obj = doc
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("schema document is not an object".into()))?;

        let name = schema_name(doc);
        validate_identifier(&name)?;

        let version = obj.get("version").and_then(Value::as_i64).unwrap_or(1);
        if version < 1 {
            return Err(SchemaError::Malformed(format!(
                "version must be >= 1, got {}",
                version
            )));
        }

        let props = obj
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::Malformed("schema has no properties".into()))?;

        let mut schema = Schema::new(name.clone(), version as i32);
        schema.source_json = doc.to_string();

        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for (prop_name, spec) in props {
            validate_identifier(prop_name)?;
            let prop = parse_property(prop_name, &name, spec, &required)?;
            if prop.is_id {
                if let Some(existing) = schema.properties.values().find(|p| p.is_id) {
                    return Err(SchemaError::DuplicateField(format!(
                        "{} and {}",
                        existing.name, prop.name
                    )));
                }
            }
            schema.push_property(prop);
        }

        if let Some(indexes) = obj.get("indexes").and_then(Value::as_array) {
            for idx in indexes {
                schema.indexes.push(parse_index(idx, &schema)?);
            }
        }

        Ok(schema)
    }
}

/// Schema name resolution: `name`, else `title`, else the last path
/// segment of `$id`, else `"unnamed"`.
fn schema_name(doc: &Value) -> String {
    if let Some(name) = doc.get("name").and_then(Value::as_str) {
        return name.to_string();
    }
    if let Some(title) = doc.get("title").and_then(Value::as_str) {
        return title.to_string();
    }
    if let Some(id) = doc.get("$id").and_then(Value::as_str) {
        let tail = id.trim_end_matches('/').rsplit('/').next().unwrap_or(id);
        let tail = tail.strip_suffix(".json").unwrap_or(tail);
        if !tail.is_empty() {
            return tail.to_string();
        }
    }
    "unnamed".to_string()
}

fn parse_property(
    name: &str,
    schema_name: &str,
    spec: &Value,
    required: &[&str],
) -> Result<Property, SchemaError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| SchemaError::Malformed(format!("property {} is not an object", name)))?;

    let ty = match obj.get("type").and_then(Value::as_str).unwrap_or("string") {
        "string" => PropType::String,
        "integer" => PropType::Integer,
        "number" => PropType::Number,
        "boolean" => PropType::Bool,
        "date" => PropType::Date,
        "time" => PropType::Time,
        "datetime" => PropType::DateTime,
        "timestamp" => PropType::Timestamp,
        "binary" => PropType::Binary,
        "json" => PropType::Json,
        other => return Err(SchemaError::UnknownType(other.to_string())),
    };

    let mut prop = Property::new(name, schema_name, ty);
    prop.required = required.contains(&name);
    prop.is_id = obj.get("idprop").and_then(Value::as_bool).unwrap_or(false);
    prop.id_kind = match obj.get("idkind").and_then(Value::as_str) {
        None => IdKind::default(),
        Some(kind) => parse_id_kind(kind)?,
    };
    prop.encoding = obj
        .get("encoding")
        .and_then(Value::as_str)
        .map(str::to_string);
    prop.indexed = obj.get("index").and_then(Value::as_bool).unwrap_or(false);
    prop.index_type = obj
        .get("indexType")
        .and_then(Value::as_str)
        .map(str::to_string);
    prop.unique = obj.get("unique").and_then(Value::as_bool).unwrap_or(false);
    prop.index_name = obj
        .get("indexName")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(default) = obj.get("default") {
        prop.default = classify_default(default);
    }

    Ok(prop)
}

fn parse_id_kind(kind: &str) -> Result<IdKind, SchemaError> {
    match kind.to_lowercase().as_str() {
        "uuidv7" => Ok(IdKind::UuidV7),
        "highlow" => Ok(IdKind::HighLow),
        "snowflake" => Ok(IdKind::Snowflake),
        "dbserial" => Ok(IdKind::DbSerial),
        "tbserial" => Ok(IdKind::TbSerial),
        other => Err(SchemaError::Malformed(format!("unknown idkind: {}", other))),
    }
}

/// Classify a `default` literal.
///
/// Strings become quoted text literals; booleans and numbers become bare
/// literals; `null` becomes `Raw("NULL")`; the single-key object form
/// `{"raw": "<sql>"}` injects verbatim SQL (how the bootstrap schemas
/// express `CURRENT_TIMESTAMP`); any other object or array is emitted as
/// its JSON text.
fn classify_default(value: &Value) -> DefaultValue {
    match value {
        Value::String(s) => DefaultValue {
            kind: DefaultKind::String,
            literal: s.clone(),
        },
        Value::Bool(b) => DefaultValue {
            kind: DefaultKind::Boolean,
            literal: b.to_string(),
        },
        Value::Number(n) => DefaultValue {
            kind: DefaultKind::Number,
            literal: n.to_string(),
        },
        Value::Null => DefaultValue {
            kind: DefaultKind::Raw,
            literal: "NULL".to_string(),
        },
        Value::Object(map) if map.len() == 1 => match map.get("raw").and_then(Value::as_str) {
            Some(raw) => DefaultValue {
                kind: DefaultKind::Raw,
                literal: raw.to_string(),
            },
            None => DefaultValue {
                kind: DefaultKind::Raw,
                literal: value.to_string(),
            },
        },
        Value::Object(_) | Value::Array(_) => DefaultValue {
            kind: DefaultKind::Raw,
            literal: value.to_string(),
        },
    }
}

fn parse_index(idx: &Value, schema: &Schema) -> Result<CompositeIndex, SchemaError> {
    let obj = idx
        .as_object()
        .ok_or_else(|| SchemaError::Malformed("index entry is not an object".into()))?;

    let fields: Vec<String> = obj
        .get("fields")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if fields.is_empty() {
        return Err(SchemaError::Malformed("index has no fields".into()));
    }
    for field in &fields {
        if !schema.properties.contains_key(field) {
            return Err(SchemaError::Malformed(format!(
                "index references unknown property: {}",
                field
            )));
        }
    }

    Ok(CompositeIndex {
        fields,
        index_type: obj
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
        unique: obj.get("unique").and_then(Value::as_bool).unwrap_or(false),
        name: obj
            .get("indexName")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(source: &str) -> Result<Schema, SchemaError> {
        Schema::from_str(source)
    }

    #[test]
    fn test_name_resolution_chain() {
        let s = load(r#"{"name":"users","properties":{"a":{"type":"string"}}}"#).unwrap();
        assert_eq!(s.name, "users");

        let s = load(r#"{"title":"orders","properties":{"a":{"type":"string"}}}"#).unwrap();
        assert_eq!(s.name, "orders");

        let s = load(
            r#"{"$id":"https://example.com/schemas/events.json","properties":{"a":{"type":"string"}}}"#,
        )
        .unwrap();
        assert_eq!(s.name, "events");
    }

    #[test]
    fn test_missing_properties_is_malformed() {
        let err = load(r#"{"name":"users"}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn test_property_order_matches_json_order() {
        let s = load(
            r#"{"name":"t","properties":{
                "zeta":{"type":"string"},
                "alpha":{"type":"integer"},
                "mid":{"type":"boolean"}
            }}"#,
        )
        .unwrap();
        let order: Vec<_> = s.properties.keys().cloned().collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_required_flags() {
        let s = load(
            r#"{"name":"t","required":["a"],"properties":{
                "a":{"type":"string"},"b":{"type":"string"}
            }}"#,
        )
        .unwrap();
        assert!(s.properties["a"].required);
        assert!(!s.properties["b"].required);
    }

    #[test]
    fn test_unknown_type_fails() {
        let err = load(r#"{"name":"t","properties":{"a":{"type":"uuid"}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType(t) if t == "uuid"));
    }

    #[test]
    fn test_idprop_and_idkind() {
        let s = load(
            r#"{"name":"t","properties":{
                "id":{"type":"integer","idprop":true,"idkind":"Snowflake"},
                "name":{"type":"string"}
            }}"#,
        )
        .unwrap();
        let pk = s.pk().unwrap();
        assert!(pk.is_id);
        assert_eq!(pk.id_kind, IdKind::Snowflake);

        // default kind
        let s = load(r#"{"name":"t","properties":{"id":{"type":"string","idprop":true}}}"#).unwrap();
        assert_eq!(s.pk().unwrap().id_kind, IdKind::UuidV7);
    }

    #[test]
    fn test_duplicate_idprop_fails() {
        let err = load(
            r#"{"name":"t","properties":{
                "a":{"type":"integer","idprop":true},
                "b":{"type":"integer","idprop":true}
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField(_)));
    }

    #[test]
    fn test_default_classification() {
        let s = load(
            r#"{"name":"t","properties":{
                "s":{"type":"string","default":"abc"},
                "b":{"type":"boolean","default":true},
                "n":{"type":"number","default":42},
                "e":{"type":"string","default":""},
                "z":{"type":"string","default":null},
                "r":{"type":"datetime","default":{"raw":"CURRENT_TIMESTAMP"}},
                "j":{"type":"json","default":{"a":1}}
            }}"#,
        )
        .unwrap();
        assert_eq!(s.properties["s"].default.kind, DefaultKind::String);
        assert_eq!(s.properties["s"].default.literal, "abc");
        assert_eq!(s.properties["b"].default.kind, DefaultKind::Boolean);
        assert_eq!(s.properties["b"].default.literal, "true");
        assert_eq!(s.properties["n"].default.kind, DefaultKind::Number);
        assert_eq!(s.properties["n"].default.literal, "42");
        assert_eq!(s.properties["e"].default.kind, DefaultKind::String);
        assert_eq!(s.properties["e"].default.literal, "");
        assert_eq!(s.properties["z"].default.kind, DefaultKind::Raw);
        assert_eq!(s.properties["z"].default.literal, "NULL");
        assert_eq!(s.properties["r"].default.kind, DefaultKind::Raw);
        assert_eq!(s.properties["r"].default.literal, "CURRENT_TIMESTAMP");
        assert_eq!(s.properties["j"].default.kind, DefaultKind::Raw);
        assert_eq!(s.properties["j"].default.literal, r#"{"a":1}"#);
    }

    #[test]
    fn test_composite_indexes() {
        let s = load(
            r#"{"name":"t","properties":{
                "a":{"type":"string"},"b":{"type":"integer"}
            },"indexes":[
                {"fields":["a","b"],"unique":true,"indexName":"idx_ab"},
                {"fields":["b"]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(s.indexes.len(), 2);
        assert_eq!(s.indexes[0].fields, vec!["a", "b"]);
        assert!(s.indexes[0].unique);
        assert_eq!(s.indexes[0].name.as_deref(), Some("idx_ab"));
        assert!(!s.indexes[1].unique);
    }

    #[test]
    fn test_index_on_unknown_property_fails() {
        let err = load(
            r#"{"name":"t","properties":{"a":{"type":"string"}},
                "indexes":[{"fields":["missing"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let err = load(r#"{"name":"bad name","properties":{"a":{"type":"string"}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));

        let err = load(r#"{"name":"t","properties":{"bad-col":{"type":"string"}}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Malformed(_)));
    }
}
