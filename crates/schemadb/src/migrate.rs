//! Forward migration planning: DDL to evolve one applied schema version
//! into the next. Only DDL evolution is ever planned; data is left alone.

use std::collections::HashSet;

use crate::ddl;
use crate::dialect::Dialect;
use crate::schema::{CompositeIndex, Schema};

/// Plan the ALTER/INDEX statements that evolve `old` into `new`.
///
/// POSTGRES plans cover column adds, drops, type changes, default changes
/// and nullability flips. SQLITE cannot alter a column in place, so its
/// plans are limited to ADD/DROP COLUMN plus index changes; a type change
/// there is reported as unplannable.
pub fn plan(old: &Schema, new: &Schema, dialect: Dialect) -> Vec<String> {
    let mut statements = Vec::new();
    let table = &new.name;

    // Added and altered columns.
    for (name, np) in &new.properties {
        match old.properties.get(name) {
            None => {
                let mut col = format!("{} {}", np.name, ddl::sql_type(np.ty, dialect));
                if np.required {
                    col.push_str(" NOT NULL");
                }
                if np.unique {
                    col.push_str(" UNIQUE");
                }
                col.push_str(&render_default(np));
                statements.push(format!("ALTER TABLE {} ADD COLUMN {};", table, col));
            }
            Some(op) => {
                if np.ty != op.ty {
                    if dialect == Dialect::Postgres {
                        statements.push(format!(
                            "ALTER TABLE {} ALTER COLUMN {} TYPE {};",
                            table,
                            name,
                            ddl::sql_type(np.ty, dialect)
                        ));
                    } else {
                        tracing::warn!(
                            table = %table,
                            column = %name,
                            "sqlite cannot change a column type in place; skipping"
                        );
                    }
                }
                if dialect == Dialect::Postgres {
                    if np.default.literal != op.default.literal || np.default.kind != op.default.kind
                    {
                        if np.default.is_none() {
                            statements.push(format!(
                                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                                table, name
                            ));
                        } else {
                            statements.push(format!(
                                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT{};",
                                table,
                                name,
                                render_default(np).trim_start_matches(" DEFAULT")
                            ));
                        }
                    }
                    if np.required != op.required {
                        statements.push(format!(
                            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL;",
                            table,
                            name,
                            if np.required { "SET" } else { "DROP" }
                        ));
                    }
                }
            }
        }
    }

    // Dropped columns.
    for name in old.properties.keys() {
        if !new.properties.contains_key(name) {
            statements.push(format!("ALTER TABLE {} DROP COLUMN {};", table, name));
        }
    }

    // Composite index diff, keyed by shape.
    let old_keys: HashSet<String> = old.indexes.iter().map(index_key).collect();
    let new_keys: HashSet<String> = new.indexes.iter().map(index_key).collect();

    for idx in &new.indexes {
        if !old_keys.contains(&index_key(idx)) {
            let fields: Vec<&str> = idx.fields.iter().map(String::as_str).collect();
            let name = idx
                .name
                .clone()
                .unwrap_or_else(|| format!("idx_{}_{}", table, fields.join("_")));
            statements.push(format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                if idx.unique { "UNIQUE " } else { "" },
                name,
                table,
                fields.join(", ")
            ));
        }
    }
    for idx in &old.indexes {
        if !new_keys.contains(&index_key(idx)) {
            let fields: Vec<&str> = idx.fields.iter().map(String::as_str).collect();
            let name = idx
                .name
                .clone()
                .unwrap_or_else(|| format!("idx_{}_{}", table, fields.join("_")));
            statements.push(format!("DROP INDEX IF EXISTS {};", name));
        }
    }

    statements
}

fn render_default(prop: &crate::schema::Property) -> String {
    use crate::schema::DefaultKind;
    match prop.default.kind {
        DefaultKind::None => String::new(),
        DefaultKind::String => format!(" DEFAULT '{}'", prop.default.literal.replace('\'', "''")),
        DefaultKind::Boolean | DefaultKind::Number | DefaultKind::Raw => {
            format!(" DEFAULT {}", prop.default.literal)
        }
    }
}

fn index_key(idx: &CompositeIndex) -> String {
    format!(
        "{}:{}:{}{}",
        idx.name.as_deref().unwrap_or(""),
        idx.fields.join(","),
        idx.index_type.as_deref().unwrap_or(""),
        if idx.unique { ":U" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn v(source: &str) -> Schema {
        Schema::from_str(source).unwrap()
    }

    #[test]
    fn test_add_column() {
        let old = v(r#"{"name":"users","properties":{"id":{"type":"integer","idprop":true}}}"#);
        let new = v(
            r#"{"name":"users","version":2,"required":["email"],"properties":{
                "id":{"type":"integer","idprop":true},
                "email":{"type":"string","default":"none"}
            }}"#,
        );
        let stmts = plan(&old, &new, Dialect::Postgres);
        assert_eq!(
            stmts,
            vec!["ALTER TABLE users ADD COLUMN email TEXT NOT NULL DEFAULT 'none';"]
        );
    }

    #[test]
    fn test_drop_column() {
        let old = v(
            r#"{"name":"users","properties":{
                "id":{"type":"integer","idprop":true},
                "legacy":{"type":"string"}
            }}"#,
        );
        let new = v(r#"{"name":"users","version":2,"properties":{"id":{"type":"integer","idprop":true}}}"#);
        let stmts = plan(&old, &new, Dialect::Sqlite);
        assert_eq!(stmts, vec!["ALTER TABLE users DROP COLUMN legacy;"]);
    }

    #[test]
    fn test_type_change_postgres_only() {
        let old = v(
            r#"{"name":"t","properties":{
                "id":{"type":"integer","idprop":true},
                "score":{"type":"integer"}
            }}"#,
        );
        let new = v(
            r#"{"name":"t","version":2,"properties":{
                "id":{"type":"integer","idprop":true},
                "score":{"type":"number"}
            }}"#,
        );
        let pg = plan(&old, &new, Dialect::Postgres);
        assert_eq!(pg, vec!["ALTER TABLE t ALTER COLUMN score TYPE NUMERIC;"]);
        let lite = plan(&old, &new, Dialect::Sqlite);
        assert!(lite.is_empty());
    }

    #[test]
    fn test_nullability_flip() {
        let old = v(
            r#"{"name":"t","properties":{
                "id":{"type":"integer","idprop":true},
                "a":{"type":"string"}
            }}"#,
        );
        let new = v(
            r#"{"name":"t","version":2,"required":["a"],"properties":{
                "id":{"type":"integer","idprop":true},
                "a":{"type":"string"}
            }}"#,
        );
        let stmts = plan(&old, &new, Dialect::Postgres);
        assert_eq!(stmts, vec!["ALTER TABLE t ALTER COLUMN a SET NOT NULL;"]);
    }

    #[test]
    fn test_index_diff() {
        let old = v(
            r#"{"name":"t","properties":{
                "id":{"type":"integer","idprop":true},
                "a":{"type":"string"},"b":{"type":"string"}
            },"indexes":[{"fields":["a"],"indexName":"ix_a"}]}"#,
        );
        let new = v(
            r#"{"name":"t","version":2,"properties":{
                "id":{"type":"integer","idprop":true},
                "a":{"type":"string"},"b":{"type":"string"}
            },"indexes":[{"fields":["a","b"],"unique":true}]}"#,
        );
        let stmts = plan(&old, &new, Dialect::Sqlite);
        assert!(stmts.contains(&"CREATE UNIQUE INDEX IF NOT EXISTS idx_t_a_b ON t (a, b);".to_string()));
        assert!(stmts.contains(&"DROP INDEX IF EXISTS ix_a;".to_string()));
    }

    #[test]
    fn test_no_changes_plans_nothing() {
        let old = v(r#"{"name":"t","properties":{"id":{"type":"integer","idprop":true}}}"#);
        let mut new = old.clone();
        new.version = 2;
        assert!(plan(&old, &new, Dialect::Postgres).is_empty());
    }
}
