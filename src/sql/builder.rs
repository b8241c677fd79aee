//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from an entity schema and query options.

use crate::config::{EntitySchema, FieldSchema, RelationDirection, ResolvedModel, DELETED_AT, UPDATED_AT};
use std::sync::Arc;
use crate::error::AccessError;
use crate::query::{Direction, Filter, FilterOp, Include, QueryOptions};
use serde_json::{Map, Value};

/// Alias of the main table in every statement.
const MAIN_ALIAS: &str = "t0";

/// Which rows of a paranoid entity a statement may touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Live,
    Deleted,
}

/// Quote identifier for PostgreSQL (safe: only from definitions).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    /// Placeholder for the next parameter, cast to the column type so text and numbers bind alike.
    fn push_param(&mut self, v: Value, field: Option<&FieldSchema>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match field {
            Some(f) => format!("${}::{}", n, f.kind.pg_type()),
            None => format!("${}", n),
        }
    }
}

fn column(alias: &str, name: &str) -> String {
    format!("{}.{}", quoted(alias), quoted(name))
}

/// Columns of `entity` (timestamps included) qualified with `alias`.
fn select_column_list(entity: &EntitySchema, alias: &str) -> Vec<String> {
    entity
        .column_names()
        .into_iter()
        .map(|c| format!("{} AS {}", column(alias, c), quoted(c)))
        .collect()
}

fn filter_sql(entity: &EntitySchema, alias: &str, filter: &Filter, q: &mut QueryBuf) -> Result<String, AccessError> {
    let field = entity
        .field(&filter.field)
        .ok_or_else(|| AccessError::Failure(format!("'{}' has no field '{}'", entity.name, filter.field)))?;
    let col = column(alias, &field.name);
    Ok(match (filter.op, &filter.value) {
        (FilterOp::Eq, Value::Null) => format!("{} IS NULL", col),
        (FilterOp::Ne, Value::Null) => format!("{} IS NOT NULL", col),
        (FilterOp::Like, v) => {
            let needle = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let ph = q.push_param(Value::String(format!("%{}%", needle)), None);
            format!("{}::text ILIKE {}", col, ph)
        }
        (op, v) => {
            let ph = q.push_param(v.clone(), Some(field));
            format!("{} {} {}", col, op.sql(), ph)
        }
    })
}

/// WHERE clause for the filters plus the soft-delete scope of paranoid entities.
fn where_clause(
    entity: &EntitySchema,
    alias: &str,
    filters: &[Filter],
    scope: Scope,
    q: &mut QueryBuf,
) -> Result<String, AccessError> {
    let mut parts = Vec::with_capacity(filters.len() + 1);
    for f in filters {
        parts.push(filter_sql(entity, alias, f, q)?);
    }
    if entity.paranoid {
        parts.push(match scope {
            Scope::Live => format!("{} IS NULL", column(alias, DELETED_AT)),
            Scope::Deleted => format!("{} IS NOT NULL", column(alias, DELETED_AT)),
        });
    }
    Ok(if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    })
}

fn order_clause(entity: &EntitySchema, options: &QueryOptions) -> String {
    if options.sort.is_empty() {
        return format!(" ORDER BY {}", column(MAIN_ALIAS, &entity.primary_key));
    }
    let keys: Vec<String> = options
        .sort
        .iter()
        .map(|s| {
            let dir = match s.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("{} {}", column(MAIN_ALIAS, &s.field), dir)
        })
        .collect();
    format!(" ORDER BY {}", keys.join(", "))
}

/// Scalar subqueries for includes: row_to_json for to-one, json_agg for to-many. Nested
/// includes recurse with fresh aliases.
fn include_columns(
    model: &ResolvedModel,
    includes: &[Include],
    parent_alias: &str,
    next_alias: &mut usize,
) -> Result<Vec<String>, AccessError> {
    let mut out = Vec::with_capacity(includes.len());
    for inc in includes {
        let related = model
            .entity(&inc.entity)
            .ok_or_else(|| AccessError::Failure(format!("unknown included entity '{}'", inc.entity)))?;
        *next_alias += 1;
        let alias = format!("t{}", next_alias);
        let mut cols = select_column_list(related, &alias);
        cols.extend(include_columns(model, &inc.includes, &alias, next_alias)?);
        let mut cond = format!(
            "{} = {}",
            column(&alias, &inc.their_key),
            column(parent_alias, &inc.our_key)
        );
        if related.paranoid {
            cond.push_str(&format!(" AND {} IS NULL", column(&alias, DELETED_AT)));
        }
        let inner = format!(
            "SELECT {} FROM {} AS {} WHERE {}",
            cols.join(", "),
            quoted(&related.name),
            quoted(&alias),
            cond
        );
        let sub = match inc.direction {
            RelationDirection::ToOne => format!("(SELECT row_to_json(sub) FROM ({} LIMIT 1) sub)", inner),
            RelationDirection::ToMany => format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM ({} ORDER BY {}) sub)",
                inner,
                column(&alias, &related.primary_key)
            ),
        };
        out.push(format!("{} AS {}", sub, quoted(&inc.alias)));
    }
    Ok(out)
}

/// SELECT one page of rows with includes in a single query.
pub fn select_page(model: &ResolvedModel, entity: &EntitySchema, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    let mut q = QueryBuf::new();
    let mut cols = select_column_list(entity, MAIN_ALIAS);
    cols.extend(include_columns(model, &options.includes, MAIN_ALIAS, &mut 0)?);
    let where_sql = where_clause(entity, MAIN_ALIAS, &options.filters, Scope::Live, &mut q)?;
    let page_sql = options
        .pagination
        .map(|p| format!(" LIMIT {} OFFSET {}", p.limit, p.offset))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} AS {}{}{}{}",
        cols.join(", "),
        quoted(&entity.name),
        quoted(MAIN_ALIAS),
        where_sql,
        order_clause(entity, options),
        page_sql
    );
    Ok(q)
}

/// SELECT at most one row matching the filters.
pub fn select_one(model: &ResolvedModel, entity: &EntitySchema, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    let mut single = options.clone();
    single.pagination = None;
    let mut q = select_page(model, entity, &single)?;
    q.sql.push_str(" LIMIT 1");
    Ok(q)
}

/// COUNT of rows matching the filters, ignoring pagination.
pub fn count(entity: &EntitySchema, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(entity, MAIN_ALIAS, &options.filters, Scope::Live, &mut q)?;
    q.sql = format!(
        "SELECT COUNT(*) AS total FROM {} AS {}{}",
        quoted(&entity.name),
        quoted(MAIN_ALIAS),
        where_sql
    );
    Ok(q)
}

/// INSERT the given fields; columns the caller did not send fall back to their DB default.
pub fn insert(entity: &EntitySchema, fields: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in &entity.fields {
        let Some(v) = fields.get(&f.name) else { continue };
        placeholders.push(q.push_param(v.clone(), Some(f)));
        cols.push(quoted(&f.name));
    }
    let returning = entity.column_names().into_iter().map(quoted).collect::<Vec<_>>().join(", ");
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", quoted(&entity.name), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quoted(&entity.name),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// One INSERT of a nested create. `links` copy a column of an earlier step's row into this one.
#[derive(Debug)]
pub struct InsertStep {
    pub entity: Arc<EntitySchema>,
    pub fields: Map<String, Value>,
    pub links: Vec<KeyLink>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct KeyLink {
    pub column: String,
    pub step: usize,
    pub source: String,
}

/// INSERTs in dependency order; `root` is the step whose row the request created.
#[derive(Debug)]
pub struct InsertPlan {
    pub steps: Vec<InsertStep>,
    pub root: usize,
}

impl InsertPlan {
    pub fn is_nested(&self) -> bool {
        self.steps.len() > 1
    }
}

/// Split a create body into one INSERT per entity. Related rows the entity references are
/// inserted first and their key copied into its reference field; rows referencing it follow.
pub fn insert_plan(
    model: &ResolvedModel,
    entity: &Arc<EntitySchema>,
    body: &Map<String, Value>,
) -> Result<InsertPlan, AccessError> {
    let mut steps = Vec::new();
    let root = plan_step(model, entity, body, None, &mut steps)?;
    Ok(InsertPlan { steps, root })
}

fn plan_step(
    model: &ResolvedModel,
    entity: &Arc<EntitySchema>,
    body: &Map<String, Value>,
    inherited: Option<KeyLink>,
    steps: &mut Vec<InsertStep>,
) -> Result<usize, AccessError> {
    let mut fields = Map::new();
    let mut links = Vec::new();
    let mut dependents = Vec::new();
    for (key, v) in body {
        let Value::Object(nested) = v else {
            fields.insert(key.clone(), v.clone());
            continue;
        };
        let link = model
            .relation(entity, key)
            .ok_or_else(|| AccessError::Failure(format!("'{}' has no relation '{}'", entity.name, key)))?;
        if link.holds_key {
            let step = plan_step(model, &link.target, nested, None, steps)?;
            links.push(KeyLink {
                column: link.our_key,
                step,
                source: link.their_key,
            });
        } else {
            dependents.push((link, nested));
        }
    }
    if let Some(l) = inherited {
        links.push(l);
    }
    for l in &links {
        fields.remove(&l.column);
    }
    steps.push(InsertStep {
        entity: entity.clone(),
        fields,
        links,
    });
    let own = steps.len() - 1;
    for (link, nested) in dependents {
        let back = KeyLink {
            column: link.their_key,
            step: own,
            source: link.our_key,
        };
        plan_step(model, &link.target, nested, Some(back), steps)?;
    }
    Ok(own)
}

/// UPDATE matching rows: SET only the fields present. Touches `updated_at` when the entity keeps timestamps.
pub fn update(entity: &EntitySchema, fields: &Map<String, Value>, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for f in &entity.fields {
        if f.primary_key {
            continue;
        }
        let Some(v) = fields.get(&f.name) else { continue };
        let ph = q.push_param(v.clone(), Some(f));
        sets.push(format!("{} = {}", quoted(&f.name), ph));
    }
    if entity.timestamps {
        sets.push(format!("{} = NOW()", quoted(UPDATED_AT)));
    }
    if sets.is_empty() {
        let pk = quoted(&entity.primary_key);
        sets.push(format!("{} = {}", pk, pk));
    }
    let where_sql = where_clause(entity, MAIN_ALIAS, &options.filters, Scope::Live, &mut q)?;
    q.sql = format!(
        "UPDATE {} AS {} SET {}{}",
        quoted(&entity.name),
        quoted(MAIN_ALIAS),
        sets.join(", "),
        where_sql
    );
    Ok(q)
}

/// DELETE matching rows, or stamp `deleted_at` on paranoid entities.
pub fn delete(entity: &EntitySchema, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(entity, MAIN_ALIAS, &options.filters, Scope::Live, &mut q)?;
    q.sql = if entity.paranoid {
        format!(
            "UPDATE {} AS {} SET {} = NOW(){}",
            quoted(&entity.name),
            quoted(MAIN_ALIAS),
            quoted(DELETED_AT),
            where_sql
        )
    } else {
        format!("DELETE FROM {} AS {}{}", quoted(&entity.name), quoted(MAIN_ALIAS), where_sql)
    };
    Ok(q)
}

/// Clear `deleted_at` on soft-deleted rows matching the filters.
pub fn restore(entity: &EntitySchema, options: &QueryOptions) -> Result<QueryBuf, AccessError> {
    if !entity.paranoid {
        return Err(AccessError::Failure(format!("'{}' does not keep deleted rows", entity.name)));
    }
    let mut q = QueryBuf::new();
    let where_sql = where_clause(entity, MAIN_ALIAS, &options.filters, Scope::Deleted, &mut q)?;
    q.sql = format!(
        "UPDATE {} AS {} SET {} = NULL{}",
        quoted(&entity.name),
        quoted(MAIN_ALIAS),
        quoted(DELETED_AT),
        where_sql
    );
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{from_json, resolve};
    use crate::query::{Pagination, Sort};
    use serde_json::json;

    fn model() -> ResolvedModel {
        let entities = r#"[
            { "name": "persona", "fields": [ { "name": "nombre", "type": "string" }, { "name": "ci", "type": "integer" } ] },
            { "name": "estudiante", "paranoid": true, "fields": [
                { "name": "ru", "type": "integer" },
                { "name": "id_persona", "reference": { "entity": "persona", "type": "1:1" } }
            ] }
        ]"#;
        resolve(&from_json(entities, None).unwrap()).unwrap()
    }

    #[test]
    fn page_filters_sorts_and_excludes_deleted() {
        let m = model();
        let e = m.entity("estudiante").unwrap();
        let mut options = QueryOptions::default().eq("ru", json!(7));
        options.filters.push(Filter {
            field: "id_persona".into(),
            op: FilterOp::Gte,
            value: json!(2),
        });
        options.sort.push(Sort {
            field: "ru".into(),
            direction: Direction::Desc,
        });
        options.pagination = Some(Pagination { offset: 20, limit: 10 });
        let q = select_page(&m, e, &options).unwrap();
        assert!(q.sql.contains(r#"WHERE "t0"."ru" = $1::bigint AND "t0"."id_persona" >= $2::bigint AND "t0"."deleted_at" IS NULL"#));
        assert!(q.sql.ends_with(r#"ORDER BY "t0"."ru" DESC LIMIT 10 OFFSET 20"#));
        assert_eq!(q.params, vec![json!(7), json!(2)]);
    }

    #[test]
    fn to_one_include_is_a_row_to_json_subquery() {
        let m = model();
        let e = m.entity("estudiante").unwrap();
        let options = QueryOptions {
            includes: vec![Include {
                alias: "persona".into(),
                entity: "persona".into(),
                direction: RelationDirection::ToOne,
                our_key: "id_persona".into(),
                their_key: "id".into(),
                includes: Vec::new(),
            }],
            ..QueryOptions::default()
        };
        let q = select_one(&m, e, &options).unwrap();
        assert!(q.sql.contains(r#"(SELECT row_to_json(sub) FROM (SELECT "t1"."id" AS "id""#));
        assert!(q.sql.contains(r#"WHERE "t1"."id" = "t0"."id_persona" LIMIT 1) sub) AS "persona""#));
    }

    #[test]
    fn like_wraps_value_and_casts_column() {
        let m = model();
        let e = m.entity("persona").unwrap();
        let options = QueryOptions {
            filters: vec![Filter {
                field: "nombre".into(),
                op: FilterOp::Like,
                value: json!("ana"),
            }],
            ..QueryOptions::default()
        };
        let q = count(e, &options).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT COUNT(*) AS total FROM "persona" AS "t0" WHERE "t0"."nombre"::text ILIKE $1"#
        );
        assert_eq!(q.params, vec![json!("%ana%")]);
    }

    #[test]
    fn paranoid_delete_stamps_and_restore_clears() {
        let m = model();
        let e = m.entity("estudiante").unwrap();
        let options = QueryOptions::default().eq("id", json!(3));
        let d = delete(e, &options).unwrap();
        assert!(d.sql.starts_with(r#"UPDATE "estudiante" AS "t0" SET "deleted_at" = NOW()"#));
        let r = restore(e, &options).unwrap();
        assert!(r.sql.ends_with(r#""t0"."deleted_at" IS NOT NULL"#));
        assert!(restore(m.entity("persona").unwrap(), &options).is_err());
    }

    #[test]
    fn update_sets_present_fields_and_timestamp() {
        let m = model();
        let e = m.entity("persona").unwrap();
        let mut fields = Map::new();
        fields.insert("ci".into(), json!(42));
        let q = update(e, &fields, &QueryOptions::default().eq("id", json!(1))).unwrap();
        assert_eq!(
            q.sql,
            r#"UPDATE "persona" AS "t0" SET "ci" = $1::bigint, "updated_at" = NOW() WHERE "t0"."id" = $2::bigint"#
        );
    }

    #[test]
    fn insert_skips_absent_columns() {
        let m = model();
        let e = m.entity("persona").unwrap();
        let mut fields = Map::new();
        fields.insert("nombre".into(), json!("Ana"));
        let q = insert(e, &fields);
        assert!(q.sql.starts_with(r#"INSERT INTO "persona" ("nombre") VALUES ($1::varchar(255)) RETURNING "id""#));
    }

    #[test]
    fn nested_create_inserts_referenced_row_first() {
        let m = model();
        let e = m.entity("estudiante").unwrap();
        let body = json!({ "ru": 15, "persona": { "nombre": "Ana Quispe", "ci": 12345678 } });
        let plan = insert_plan(&m, e, body.as_object().unwrap()).unwrap();
        assert!(plan.is_nested());
        assert_eq!(plan.root, 1);
        assert_eq!(plan.steps[0].entity.name, "persona");
        let q = insert(&plan.steps[0].entity, &plan.steps[0].fields);
        assert!(q.sql.starts_with(r#"INSERT INTO "persona" ("nombre", "ci") VALUES ($1::varchar(255), $2::bigint)"#));
        assert_eq!(q.params, vec![json!("Ana Quispe"), json!(12345678)]);
        assert_eq!(Value::Object(plan.steps[1].fields.clone()), json!({ "ru": 15 }));
        assert_eq!(
            plan.steps[1].links,
            vec![KeyLink { column: "id_persona".into(), step: 0, source: "id".into() }]
        );
    }

    #[test]
    fn nested_create_inserts_referencing_row_after() {
        let m = model();
        let e = m.entity("persona").unwrap();
        let body = json!({ "nombre": "Luis Mamani", "estudiante": { "ru": 16 } });
        let plan = insert_plan(&m, e, body.as_object().unwrap()).unwrap();
        assert_eq!(plan.root, 0);
        assert_eq!(plan.steps[1].entity.name, "estudiante");
        assert_eq!(
            plan.steps[1].links,
            vec![KeyLink { column: "id_persona".into(), step: 0, source: "id".into() }]
        );

        let flat = insert_plan(&m, e, json!({ "nombre": "Luis" }).as_object().unwrap()).unwrap();
        assert!(!flat.is_nested());
        assert!(insert_plan(&m, e, json!({ "apodo": {} }).as_object().unwrap()).is_err());
    }
}
