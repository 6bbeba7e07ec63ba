//! End-to-end tests against in-memory SQLite: catalog bootstrap, schema
//! registration, writes through the full pipeline, and forward migration.

use serde_json::json;

use schemadb::pool::Intent;
use schemadb::{Dialect, Storage, StorageConfig};

const USERS_SCHEMA: &str = r#"{
    "name": "users",
    "required": ["name"],
    "properties": {
        "id": {"type": "integer", "idprop": true, "idkind": "Snowflake"},
        "name": {"type": "string"},
        "age": {"type": "integer", "index": true}
    }
}"#;

const USERS_SCHEMA_V2: &str = r#"{
    "name": "users",
    "version": 2,
    "required": ["name"],
    "properties": {
        "id": {"type": "integer", "idprop": true, "idkind": "Snowflake"},
        "name": {"type": "string"},
        "age": {"type": "integer", "index": true},
        "email": {"type": "string", "default": ""}
    }
}"#;

const NOTES_SCHEMA: &str = r#"{
    "name": "notes",
    "properties": {
        "id": {"type": "string", "idprop": true},
        "body": {"type": "string"},
        "meta": {"type": "json"}
    }
}"#;

fn storage() -> Storage {
    Storage::new(":memory:", Dialect::Sqlite).unwrap()
}

#[test]
fn init_catalog_creates_meta_tables() {
    let st = storage();
    st.init_catalog().unwrap();
    // meta schemas resolve through the registry afterwards
    assert_eq!(st.get_schema("schema_catalog").unwrap().name, "schema_catalog");
    assert_eq!(st.get_schema("schema_versions").unwrap().version, 1);
}

#[test]
fn insert_generates_snowflake_ids() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    assert_eq!(st.insert("users", &json!({"name": "Alice", "age": 30}), "").unwrap(), 1);
    assert_eq!(st.insert("users", &json!({"name": "Bob"}), "").unwrap(), 1);
}

#[test]
fn insert_array_counts_every_row() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    let rows = st
        .insert(
            "users",
            &json!([
                {"name": "a", "age": 1},
                {"name": "b", "age": 2},
                {"name": "c"}
            ]),
            "",
        )
        .unwrap();
    assert_eq!(rows, 3);
}

#[test]
fn upsert_overwrites_existing_row() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    assert_eq!(
        st.insert("users", &json!({"id": 42, "name": "Carol", "age": 25}), "").unwrap(),
        1
    );
    // same PK routes to the UPSERT statement and updates in place
    assert_eq!(
        st.insert("users", &json!({"id": 42, "name": "Caroline", "age": 26}), "").unwrap(),
        1
    );
}

#[test]
fn update_and_delete_by_pk() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    st.insert("users", &json!({"id": 7, "name": "Dee", "age": 40}), "").unwrap();

    assert_eq!(st.update("users", &json!({"id": 7, "age": 41}), "").unwrap(), 1);
    assert_eq!(st.delete("users", &json!({"id": 7}), "").unwrap(), 1);
    // deleting an absent row affects nothing
    assert_eq!(st.delete("users", &json!({"id": 7}), "").unwrap(), 0);
}

#[test]
fn string_pk_defaults_to_uuid_v7() {
    let st = storage();
    st.add_schema(NOTES_SCHEMA, None).unwrap();
    let rows = st
        .insert(
            "notes",
            &json!({"body": "hello", "meta": {"tags": ["a", "b"]}}),
            "",
        )
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn add_schema_with_connection_persists_catalog_rows() {
    let st = storage();
    st.init_catalog().unwrap();
    st.with_tx(Intent::Write, |conn| st.add_schema(USERS_SCHEMA, Some(conn)))
        .unwrap();
    st.insert("users", &json!({"name": "Eve"}), "").unwrap();
}

#[test]
fn forward_migration_adds_column() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    st.insert("users", &json!({"name": "v1 row"}), "").unwrap();

    st.add_schema(USERS_SCHEMA_V2, None).unwrap();
    // resolving drives the ALTER TABLE ... ADD COLUMN migration
    let schema = st.get_schema("users").unwrap();
    assert_eq!(schema.version, 2);
    let rows = st
        .insert("users", &json!({"name": "v2 row", "email": "x@example.com"}), "")
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn exec_ddl_and_sequences() {
    let st = storage();
    st.exec_ddl("CREATE TABLE scratch(a TEXT);").unwrap();
    let first = st
        .with_conn(Intent::Write, |conn| {
            conn.next_value("counters").map_err(Into::into)
        })
        .unwrap();
    let second = st
        .with_conn(Intent::Write, |conn| {
            conn.next_value("counters").map_err(Into::into)
        })
        .unwrap();
    assert_eq!(second, first + 1);
}

#[test]
fn pool_capacity_is_respected_for_sqlite() {
    let st = storage();
    assert_eq!(st.pool_stats().size, 1);
}

#[test]
fn custom_pool_capacity_from_config() {
    let mut config = StorageConfig::new(":memory:", Dialect::Sqlite);
    config.pool.capacity = Some(2);
    let st = Storage::with_config(config).unwrap();
    assert_eq!(st.pool_stats().size, 2);
}

#[test]
fn shutdown_stops_new_work() {
    let st = storage();
    st.add_schema(USERS_SCHEMA, None).unwrap();
    st.insert("users", &json!({"name": "a"}), "").unwrap();
    st.shutdown();
    assert!(st.insert("users", &json!({"name": "b"}), "").is_err());
}
