//! Embedded meta-schemas created by `init_catalog`.
//!
//! `schema_catalog` holds one row per schema name; `schema_versions`
//! holds one row per declared version with its source document and an
//! applied flag. Both are plain schemas fed through the same loader and
//! DDL generator as user schemas.

pub const SCHEMA_CATALOG_JSON: &str = r#"{
    "name": "schema_catalog",
    "version": 1,
    "type": "object",
    "description": "Catalog of schema names known to the store.",
    "properties": {
        "id": { "type": "integer", "idprop": true, "idkind": "DBSerial" },
        "name": { "type": "string", "unique": true, "index": true },
        "current_version": { "type": "integer", "default": 0 },
        "created_at": { "type": "datetime", "default": { "raw": "CURRENT_TIMESTAMP" } },
        "updated_at": { "type": "datetime", "default": { "raw": "CURRENT_TIMESTAMP" } }
    },
    "required": ["name", "current_version"]
}"#;

pub const SCHEMA_VERSIONS_JSON: &str = r#"{
    "name": "schema_versions",
    "version": 1,
    "type": "object",
    "description": "Every declared version of every schema, with its source document.",
    "properties": {
        "id": { "type": "integer", "idprop": true, "idkind": "DBSerial" },
        "schema_id": { "type": "integer", "index": true },
        "version": { "type": "integer" },
        "applied": { "type": "boolean", "default": false },
        "json": { "type": "string" }
    },
    "required": ["schema_id", "version"],
    "indexes": [
        { "fields": ["schema_id", "version"], "unique": true, "indexName": "idx_schema_versions_ident" }
    ]
}"#;
