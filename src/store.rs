//! PostgreSQL data accessor: runs builder queries through a pool and decodes rows into JSON.

use crate::accessor::DataAccessor;
use crate::config::{EntitySchema, ResolvedModel};
use crate::error::{AccessError, AppError};
use crate::query::QueryOptions;
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{ConnectOptions, PgPool, Postgres, Row};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    /// Needed to expand includes into the related entities' columns.
    model: Arc<ResolvedModel>,
}

impl PgStore {
    pub fn new(pool: PgPool, model: Arc<ResolvedModel>) -> Self {
        PgStore { pool, model }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all(&self, q: &QueryBuf) -> Result<Vec<Value>, AccessError> {
        let rows = bind_all(q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AccessError> {
        Ok(bind_all(q).execute(&self.pool).await?.rows_affected())
    }
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    q.params
        .iter()
        .fold(sqlx::query(&q.sql), |query, p| query.bind(PgBindValue::from_json(p)))
}

#[async_trait]
impl DataAccessor for PgStore {
    async fn find_many(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<(Vec<Value>, u64), AccessError> {
        let rows = self.fetch_all(&sql::select_page(&self.model, entity, options)?).await?;
        let count = sql::count(entity, options)?;
        let total: i64 = bind_all(&count).fetch_one(&self.pool).await?.try_get("total")?;
        Ok((rows, total.max(0) as u64))
    }

    async fn find_one(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<Option<Value>, AccessError> {
        let q = sql::select_one(&self.model, entity, options)?;
        let row = bind_all(&q).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn create(&self, entity: &EntitySchema, fields: &Map<String, Value>) -> Result<Value, AccessError> {
        let schema = self
            .model
            .entity(&entity.name)
            .ok_or_else(|| AccessError::Failure(format!("unknown entity '{}'", entity.name)))?;
        let plan = sql::insert_plan(&self.model, schema, fields)?;
        if !plan.is_nested() {
            let row = bind_all(&sql::insert(entity, fields)).fetch_one(&self.pool).await?;
            return Ok(row_to_json(&row));
        }

        let mut tx = self.pool.begin().await?;
        let mut rows: Vec<Value> = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let mut values = step.fields.clone();
            for link in &step.links {
                let key = rows
                    .get(link.step)
                    .and_then(|r| r.get(&link.source))
                    .cloned()
                    .unwrap_or(Value::Null);
                values.insert(link.column.clone(), key);
            }
            let row = bind_all(&sql::insert(&step.entity, &values)).fetch_one(&mut *tx).await?;
            rows.push(row_to_json(&row));
        }
        tx.commit().await?;
        tracing::debug!(entity = %entity.name, rows = rows.len(), "nested create committed");
        rows.into_iter()
            .nth(plan.root)
            .ok_or_else(|| AccessError::Failure(format!("nested create of '{}' returned no row", entity.name)))
    }

    async fn update(
        &self,
        entity: &EntitySchema,
        fields: &Map<String, Value>,
        options: &QueryOptions,
    ) -> Result<u64, AccessError> {
        self.execute(&sql::update(entity, fields, options)?).await
    }

    async fn destroy(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError> {
        self.execute(&sql::delete(entity, options)?).await
    }

    async fn restore(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError> {
        self.execute(&sql::restore(entity, options)?).await
    }

    async fn ping(&self) -> Result<(), AccessError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

/// Tries the column types the builder can produce, narrowest first.
fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::Internal(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::Internal("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_database_name_from_url() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/insac?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "insac");
    }
}
