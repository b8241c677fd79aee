//! In-memory accessor and app builder shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use insac_sdk::config::{EntitySchema, RelationDirection};
use insac_sdk::query::{Filter, FilterOp, Include, QueryOptions};
use insac_sdk::{app_router, from_json, resolve, AccessError, AppState, DataAccessor, ResolvedModel, Settings};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const ENTITIES: &str = include_str!("../fixtures/entities.json");
pub const ROUTES: &str = include_str!("../fixtures/routes.json");

pub fn model() -> Arc<ResolvedModel> {
    Arc::new(resolve(&from_json(ENTITIES, Some(ROUTES)).expect("fixtures parse")).expect("fixtures resolve"))
}

/// One accessor call as the executor made it.
#[derive(Clone, Debug)]
pub enum Call {
    FindMany(String, QueryOptions),
    FindOne(String, QueryOptions),
    Create(String, Map<String, Value>),
    Update(String, Map<String, Value>),
    Destroy(String),
    Restore(String),
}

#[derive(Default)]
pub struct MemoryAccessor {
    tables: Mutex<HashMap<String, Vec<Map<String, Value>>>>,
    pub calls: Mutex<Vec<Call>>,
    /// Returned (once) by the next `create`.
    pub create_failure: Mutex<Option<AccessError>>,
    clock: Mutex<u32>,
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches(row: &Map<String, Value>, f: &Filter) -> bool {
    let v = row.get(&f.field).unwrap_or(&Value::Null);
    match f.op {
        FilterOp::Eq => v == &f.value,
        FilterOp::Ne => v != &f.value,
        FilterOp::Like => match (v, &f.value) {
            (Value::String(s), Value::String(needle)) => s.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        FilterOp::Gt => compare(v, &f.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(compare(v, &f.value), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => compare(v, &f.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(compare(v, &f.value), Some(Ordering::Less | Ordering::Equal)),
    }
}

impl MemoryAccessor {
    pub fn new() -> Self {
        MemoryAccessor::default()
    }

    /// Inserts a row as stored, timestamps included.
    pub fn seed(&self, entity: &str, row: Value) {
        let Value::Object(mut row) = row else { return };
        let stamp = self.tick();
        row.entry("created_at").or_insert_with(|| stamp.clone());
        row.entry("updated_at").or_insert(stamp);
        self.tables
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .push(row);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn tick(&self) -> Value {
        let mut c = self.clock.lock().unwrap();
        *c += 1;
        json!(format!("2024-03-01T10:00:{:02}Z", *c))
    }

    fn live(entity: &EntitySchema, row: &Map<String, Value>) -> bool {
        !entity.paranoid || row.get("deleted_at").map(Value::is_null).unwrap_or(true)
    }

    fn expand(&self, tables: &HashMap<String, Vec<Map<String, Value>>>, row: &mut Map<String, Value>, includes: &[Include]) {
        for inc in includes {
            let key = row.get(&inc.our_key).cloned().unwrap_or(Value::Null);
            let mut related: Vec<Map<String, Value>> = tables
                .get(&inc.entity)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| r.get(&inc.their_key) == Some(&key) && r.get("deleted_at").map(Value::is_null).unwrap_or(true))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            for r in &mut related {
                self.expand(tables, r, &inc.includes);
            }
            let v = match inc.direction {
                RelationDirection::ToOne => related.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
                RelationDirection::ToMany => Value::Array(related.into_iter().map(Value::Object).collect()),
            };
            row.insert(inc.alias.clone(), v);
        }
    }

    fn select(&self, entity: &EntitySchema, options: &QueryOptions) -> Vec<Map<String, Value>> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<Map<String, Value>> = tables
            .get(&entity.name)
            .map(|rows| {
                rows.iter()
                    .filter(|r| Self::live(entity, r) && options.filters.iter().all(|f| matches(r, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for r in &mut rows {
            self.expand(&tables, r, &options.includes);
        }
        rows
    }

    fn modify<F>(&self, entity: &EntitySchema, options: &QueryOptions, deleted: bool, mut f: F) -> u64
    where
        F: FnMut(&mut Map<String, Value>),
    {
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(&entity.name) else { return 0 };
        let mut n = 0;
        for r in rows.iter_mut() {
            let is_deleted = !Self::live(entity, r);
            if is_deleted == deleted && options.filters.iter().all(|flt| matches(r, flt)) {
                f(r);
                n += 1;
            }
        }
        n
    }
}

#[async_trait]
impl DataAccessor for MemoryAccessor {
    async fn find_many(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<(Vec<Value>, u64), AccessError> {
        self.calls.lock().unwrap().push(Call::FindMany(entity.name.clone(), options.clone()));
        let rows = self.select(entity, options);
        let total = rows.len() as u64;
        let page: Vec<Value> = match options.pagination {
            Some(p) => rows
                .into_iter()
                .skip(p.offset as usize)
                .take(p.limit as usize)
                .map(Value::Object)
                .collect(),
            None => rows.into_iter().map(Value::Object).collect(),
        };
        Ok((page, total))
    }

    async fn find_one(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<Option<Value>, AccessError> {
        self.calls.lock().unwrap().push(Call::FindOne(entity.name.clone(), options.clone()));
        Ok(self.select(entity, options).into_iter().next().map(Value::Object))
    }

    async fn create(&self, entity: &EntitySchema, fields: &Map<String, Value>) -> Result<Value, AccessError> {
        self.calls.lock().unwrap().push(Call::Create(entity.name.clone(), fields.clone()));
        if let Some(err) = self.create_failure.lock().unwrap().take() {
            return Err(err);
        }
        let mut row = fields.clone();
        let next_id = {
            let tables = self.tables.lock().unwrap();
            tables.get(&entity.name).map(Vec::len).unwrap_or(0) as u64 + 1
        };
        row.entry("id").or_insert(json!(next_id));
        for f in &entity.fields {
            if let Some(d) = &f.default {
                row.entry(f.name.as_str()).or_insert_with(|| d.clone());
            }
        }
        self.seed(&entity.name, Value::Object(row.clone()));
        let stored = self
            .select(entity, &QueryOptions::default().eq(&entity.primary_key, row["id"].clone()))
            .into_iter()
            .next()
            .unwrap_or(row);
        Ok(Value::Object(stored))
    }

    async fn update(&self, entity: &EntitySchema, fields: &Map<String, Value>, options: &QueryOptions) -> Result<u64, AccessError> {
        self.calls.lock().unwrap().push(Call::Update(entity.name.clone(), fields.clone()));
        let stamp = self.tick();
        Ok(self.modify(entity, options, false, |r| {
            for (k, v) in fields {
                r.insert(k.clone(), v.clone());
            }
            r.insert("updated_at".into(), stamp.clone());
        }))
    }

    async fn destroy(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError> {
        self.calls.lock().unwrap().push(Call::Destroy(entity.name.clone()));
        if entity.paranoid {
            let stamp = self.tick();
            return Ok(self.modify(entity, options, false, |r| {
                r.insert("deleted_at".into(), stamp.clone());
            }));
        }
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(&entity.name) else { return Ok(0) };
        let before = rows.len();
        rows.retain(|r| !options.filters.iter().all(|f| matches(r, f)));
        Ok((before - rows.len()) as u64)
    }

    async fn restore(&self, entity: &EntitySchema, options: &QueryOptions) -> Result<u64, AccessError> {
        self.calls.lock().unwrap().push(Call::Restore(entity.name.clone()));
        Ok(self.modify(entity, options, true, |r| {
            r.insert("deleted_at".into(), Value::Null);
        }))
    }
}

pub fn app_with(accessor: Arc<MemoryAccessor>, settings: Settings) -> Router {
    app_router(AppState::new(model(), accessor, settings))
}

pub fn app(accessor: Arc<MemoryAccessor>) -> Router {
    app_with(accessor, Settings::default())
}

/// Sends one request and returns the status with the parsed JSON body (Null when empty).
pub async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, body.map(|b| b.to_string())).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response is JSON")
    };
    (status, json)
}

pub async fn send_raw(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .expect("request");
    let response = app.oneshot(request).await.expect("infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, bytes.to_vec())
}
