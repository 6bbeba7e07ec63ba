//! DDL generation: CREATE TABLE and CREATE INDEX batches per dialect.

use crate::dialect::Dialect;
use crate::schema::{CompositeIndex, DefaultKind, PropType, Property, Schema};

/// Map a property type to its column type for the given dialect.
pub fn sql_type(ty: PropType, dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Postgres => match ty {
            PropType::String => "TEXT",
            PropType::Integer => "INTEGER",
            PropType::Number => "NUMERIC",
            PropType::Bool => "BOOLEAN",
            PropType::Date => "DATE",
            PropType::Time => "TIME",
            PropType::DateTime => "TIMESTAMP",
            PropType::Timestamp => "TIMESTAMP WITH TIME ZONE",
            PropType::Binary => "BYTEA",
            PropType::Json => "JSON",
        },
        Dialect::Sqlite => match ty {
            PropType::String => "TEXT",
            PropType::Integer => "INTEGER",
            PropType::Number => "REAL",
            PropType::Bool => "BOOLEAN",
            PropType::Date => "DATE",
            PropType::Time => "TIME",
            PropType::DateTime => "TIMESTAMP",
            PropType::Timestamp => "TEXT",
            PropType::Binary => "BLOB",
            PropType::Json => "TEXT",
        },
    }
}

fn sql_escape_single_quotes(s: &str) -> String {
    s.replace('\'', "''")
}

/// Render a property's `DEFAULT` clause, empty when there is none.
fn sql_default(prop: &Property) -> String {
    match prop.default.kind {
        DefaultKind::None => String::new(),
        DefaultKind::String => format!(
            " DEFAULT '{}'",
            sql_escape_single_quotes(&prop.default.literal)
        ),
        DefaultKind::Boolean | DefaultKind::Number | DefaultKind::Raw => {
            format!(" DEFAULT {}", prop.default.literal)
        }
    }
}

/// Deterministic index name for unnamed indexes; SQLITE requires one.
fn default_index_name(table: &str, fields: &[&str]) -> String {
    format!("idx_{}_{}", table, fields.join("_"))
}

fn index_statement(
    table: &str,
    name: Option<&str>,
    fields: &[&str],
    unique: bool,
) -> String {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| default_index_name(table, fields));
    format!(
        "\nCREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
        if unique { "UNIQUE " } else { "" },
        name,
        table,
        fields.join(", ")
    )
}

/// Emit the CREATE TABLE / CREATE INDEX batch for a schema.
///
/// Columns appear in property insertion order. The batch is idempotent:
/// every statement carries `IF NOT EXISTS`.
pub fn emit(schema: &Schema, dialect: Dialect) -> String {
    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {}(\n", schema.name);

    let mut pk_fields: Vec<&str> = Vec::new();
    let count = schema.properties.len();
    for (i, prop) in schema.properties.values().enumerate() {
        ddl.push_str(&format!(" {} {}", prop.name, sql_type(prop.ty, dialect)));
        if prop.required {
            ddl.push_str(" NOT NULL");
        }
        if prop.unique {
            ddl.push_str(" UNIQUE");
        }
        ddl.push_str(&sql_default(prop));
        if prop.is_id {
            pk_fields.push(&prop.name);
        }
        ddl.push_str(if i + 1 < count { ",\n" } else { "\n" });
    }

    // Fall back to the implicit `id` PK when no property is flagged.
    if pk_fields.is_empty() && schema.properties.contains_key("id") {
        pk_fields.push("id");
    }
    if !pk_fields.is_empty() {
        ddl.push_str(&format!(",  PRIMARY KEY ({})", pk_fields.join(", ")));
    }
    ddl.push_str("\n);");

    // Per-property indexes on non-PK columns.
    for prop in schema.properties.values() {
        if prop.indexed && !prop.is_id {
            ddl.push_str(&index_statement(
                &schema.name,
                prop.index_name.as_deref(),
                &[prop.name.as_str()],
                prop.unique,
            ));
        }
    }

    // Schema-level composite indexes.
    for idx in &schema.indexes {
        ddl.push_str(&composite_index_statement(&schema.name, idx));
    }

    tracing::debug!(schema = %schema.name, dialect = %dialect, "emitted DDL");
    ddl
}

fn composite_index_statement(table: &str, idx: &CompositeIndex) -> String {
    let fields: Vec<&str> = idx.fields.iter().map(String::as_str).collect();
    index_statement(table, idx.name.as_deref(), &fields, idx.unique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn users_schema() -> Schema {
        Schema::from_str(
            r#"{
                "name": "users",
                "required": ["name"],
                "properties": {
                    "id": {"type": "integer", "idprop": true, "idkind": "Snowflake"},
                    "name": {"type": "string"},
                    "age": {"type": "integer", "index": true}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_create_table_prefix_and_column_order() {
        let ddl = emit(&users_schema(), Dialect::Sqlite);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS users(\n"));
        let id_pos = ddl.find(" id ").unwrap();
        let name_pos = ddl.find(" name ").unwrap();
        let age_pos = ddl.find(" age ").unwrap();
        assert!(id_pos < name_pos && name_pos < age_pos);
        assert!(ddl.contains("PRIMARY KEY (id)"));
        assert!(ddl.contains("name TEXT NOT NULL"));
    }

    #[test]
    fn test_per_property_index_skips_pk() {
        let ddl = emit(&users_schema(), Dialect::Sqlite);
        assert!(ddl.contains("CREATE INDEX IF NOT EXISTS idx_users_age ON users (age);"));
        assert!(!ddl.contains("ON users (id)"));
    }

    #[test]
    fn test_type_mapping_differs_per_dialect() {
        let schema = Schema::from_str(
            r#"{"name":"events","properties":{
                "id": {"type": "integer", "idprop": true},
                "num": {"type": "number"},
                "ts": {"type": "timestamp"},
                "blob": {"type": "binary"},
                "doc": {"type": "json"}
            }}"#,
        )
        .unwrap();

        let pg = emit(&schema, Dialect::Postgres);
        assert!(pg.contains("num NUMERIC"));
        assert!(pg.contains("ts TIMESTAMP WITH TIME ZONE"));
        assert!(pg.contains("blob BYTEA"));
        assert!(pg.contains("doc JSON"));

        let lite = emit(&schema, Dialect::Sqlite);
        assert!(lite.contains("num REAL"));
        assert!(lite.contains("ts TEXT"));
        assert!(lite.contains("blob BLOB"));
        assert!(lite.contains("doc TEXT"));
    }

    #[test]
    fn test_defaults_rendering() {
        // Literal scenario: string, boolean, number, empty string and null defaults.
        let schema = Schema::from_str(
            r#"{"name":"users","properties":{
                "id": {"type": "integer", "idprop": true},
                "s": {"type": "string", "default": "abc"},
                "b": {"type": "boolean", "default": true},
                "n": {"type": "number", "default": 42},
                "t": {"type": "string", "default": ""},
                "rnull": {"type": "string", "default": null}
            }}"#,
        )
        .unwrap();
        let ddl = emit(&schema, Dialect::Postgres);
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS users("));
        assert!(ddl.contains("DEFAULT 'abc'"));
        assert!(ddl.contains("DEFAULT true"));
        assert!(ddl.contains("DEFAULT 42"));
        assert!(ddl.contains("DEFAULT ''"));
        assert!(ddl.contains("DEFAULT NULL"));
    }

    #[test]
    fn test_default_string_escaping() {
        let schema = Schema::from_str(
            r#"{"name":"t","properties":{
                "id": {"type": "integer", "idprop": true},
                "q": {"type": "string", "default": "O'Brien"}
            }}"#,
        )
        .unwrap();
        let ddl = emit(&schema, Dialect::Sqlite);
        assert!(ddl.contains("DEFAULT 'O''Brien'"));
    }

    #[test]
    fn test_raw_default_emitted_verbatim() {
        let schema = Schema::from_str(
            r#"{"name":"t","properties":{
                "id": {"type": "integer", "idprop": true},
                "created_at": {"type": "datetime", "default": {"raw": "CURRENT_TIMESTAMP"}}
            }}"#,
        )
        .unwrap();
        let ddl = emit(&schema, Dialect::Sqlite);
        assert!(ddl.contains("DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_composite_index() {
        let schema = Schema::from_str(
            r#"{"name":"t","properties":{
                "id": {"type": "integer", "idprop": true},
                "a": {"type": "string"},
                "b": {"type": "integer"}
            },"indexes":[{"fields":["a","b"],"unique":true}]}"#,
        )
        .unwrap();
        let ddl = emit(&schema, Dialect::Postgres);
        assert!(ddl.contains("CREATE UNIQUE INDEX IF NOT EXISTS idx_t_a_b ON t (a, b);"));
    }

    #[test]
    fn test_unique_column_suffix() {
        let schema = Schema::from_str(
            r#"{"name":"t","properties":{
                "id": {"type": "integer", "idprop": true},
                "email": {"type": "string", "unique": true}
            }}"#,
        )
        .unwrap();
        let ddl = emit(&schema, Dialect::Sqlite);
        assert!(ddl.contains("email TEXT UNIQUE"));
    }
}
