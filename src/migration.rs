//! Apply entity schemas to the database: CREATE TABLE per entity, then foreign keys.
//! Tables are created in declaration order; foreign keys are added once every table exists.

use crate::config::{DataKind, EntitySchema, FieldSchema, ResolvedModel, CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::error::AppError;
use crate::sql::quoted;
use serde_json::Value;
use sqlx::PgPool;

/// Literal for a declared default. Strings are quoted, everything else is rendered as-is.
fn default_literal(v: &Value) -> String {
    match v {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Null => "NULL".into(),
        other => other.to_string(),
    }
}

fn column_def(f: &FieldSchema) -> String {
    let mut def = format!("{} {}", quoted(&f.name), f.kind.pg_type());
    if f.auto_increment {
        match f.kind {
            DataKind::Integer => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            DataKind::Uuid => def.push_str(" DEFAULT gen_random_uuid()"),
            _ => {}
        }
    }
    if !f.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(d) = &f.default {
        def.push_str(" DEFAULT ");
        def.push_str(&default_literal(d));
    }
    if f.unique && !f.primary_key {
        def.push_str(" UNIQUE");
    }
    def
}

/// CREATE TABLE for one entity, timestamp and soft-delete columns included.
pub fn create_table_sql(entity: &EntitySchema) -> String {
    let mut defs: Vec<String> = entity.fields.iter().map(column_def).collect();
    if entity.timestamps {
        defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted(CREATED_AT)));
        defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quoted(UPDATED_AT)));
    }
    if entity.paranoid {
        defs.push(format!("{} TIMESTAMPTZ", quoted(DELETED_AT)));
    }
    defs.push(format!("PRIMARY KEY ({})", quoted(&entity.primary_key)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quoted(&entity.name),
        defs.join(",\n    ")
    )
}

/// Name and ALTER TABLE statement for every reference field of `entity`.
pub fn foreign_key_sql(entity: &EntitySchema) -> Vec<(String, String)> {
    entity
        .fields
        .iter()
        .filter_map(|f| {
            let r = f.reference.as_ref()?;
            let name = format!("fk_{}_{}", entity.name, f.name);
            let sql = format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quoted(&entity.name),
                quoted(&name),
                quoted(&f.name),
                quoted(&r.target_entity),
                quoted(&r.key)
            );
            Some((name, sql))
        })
        .collect()
}

/// Create tables and foreign keys for every entity. With `force`, existing tables are
/// dropped first (reverse declaration order, CASCADE).
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel, force: bool) -> Result<(), AppError> {
    if force {
        for e in model.entities.iter().rev() {
            sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", quoted(&e.name)))
                .execute(pool)
                .await?;
        }
        tracing::warn!(tables = model.entities.len(), "dropped existing tables");
    }

    for e in &model.entities {
        sqlx::query(&create_table_sql(e)).execute(pool).await?;
    }

    for e in &model.entities {
        for (name, sql) in foreign_key_sql(e) {
            let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_constraint WHERE conname = $1)")
                .bind(&name)
                .fetch_one(pool)
                .await?;
            if !exists.0 {
                sqlx::query(&sql).execute(pool).await?;
            }
        }
    }
    tracing::info!(entities = model.entities.len(), force, "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{from_json, resolve};

    fn model() -> ResolvedModel {
        let entities = r#"[
            { "name": "persona", "fields": [
                { "name": "nombre", "type": { "name": "string", "length": 100 }, "nullable": false },
                { "name": "ci", "type": "integer", "nullable": false, "unique": true },
                { "name": "activo", "type": "boolean", "default": true }
            ]},
            { "name": "estudiante", "paranoid": true, "fields": [
                { "name": "id_persona", "nullable": false, "reference": { "entity": "persona", "type": "1:1" } }
            ]}
        ]"#;
        resolve(&from_json(entities, None).unwrap()).unwrap()
    }

    #[test]
    fn table_ddl_has_identity_key_and_timestamps() {
        let m = model();
        let sql = create_table_sql(m.entity("persona").unwrap());
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "persona""#));
        assert!(sql.contains(r#""id" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"#));
        assert!(sql.contains(r#""nombre" varchar(100) NOT NULL"#));
        assert!(sql.contains(r#""ci" bigint NOT NULL UNIQUE"#));
        assert!(sql.contains(r#""activo" boolean DEFAULT true"#));
        assert!(sql.contains(r#""created_at" TIMESTAMPTZ NOT NULL DEFAULT NOW()"#));
        assert!(!sql.contains("deleted_at"));
        assert!(sql.contains(r#"PRIMARY KEY ("id")"#));
    }

    #[test]
    fn paranoid_table_gets_deleted_at_and_fk() {
        let m = model();
        let e = m.entity("estudiante").unwrap();
        assert!(create_table_sql(e).contains(r#""deleted_at" TIMESTAMPTZ"#));
        let fks = foreign_key_sql(e);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].0, "fk_estudiante_id_persona");
        assert!(fks[0].1.ends_with(r#"FOREIGN KEY ("id_persona") REFERENCES "persona" ("id")"#));
    }
}
