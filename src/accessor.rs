//! Data access seam. The executor only talks to storage through this trait.

use crate::config::EntitySchema;
use crate::error::AccessError;
use crate::query::QueryOptions;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Rows are JSON objects keyed by storage column name; included relations appear
/// under their alias (object, list, or null).
#[async_trait]
pub trait DataAccessor: Send + Sync {
    /// Matching rows for the requested page plus the total count ignoring pagination.
    async fn find_many(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<(Vec<Value>, u64), AccessError>;

    async fn find_one(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<Option<Value>, AccessError>;

    /// Inserts one row and returns it as stored.
    async fn create(&self, entity: &EntitySchema, fields: &Map<String, Value>) -> Result<Value, AccessError>;

    /// Returns the number of affected rows.
    async fn update(
        &self,
        entity: &EntitySchema,
        fields: &Map<String, Value>,
        options: &QueryOptions,
    ) -> Result<u64, AccessError>;

    async fn destroy(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError>;

    /// Undoes a soft delete.
    async fn restore(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), AccessError> {
        Ok(())
    }
}
