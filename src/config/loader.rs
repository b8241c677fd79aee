//! Load definitions from JSON files or in-memory structs and resolve them into schemas and routes.

use crate::config::resolved::*;
use crate::config::route::*;
use crate::config::types::*;
use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Prefix of the generated CRUD routes.
pub const API_PREFIX: &str = "/api/v1";
/// Deepest output template accepted, root included.
pub const MAX_TEMPLATE_DEPTH: usize = 6;
/// Levels walked when generating default read templates (root plus two relations).
const DEFAULT_INCLUDE_LEVELS: usize = 3;
/// Hops followed when a reference points at another reference.
const MAX_KEY_HOPS: usize = 4;

/// Read `entities.json` (required) and `routes.json` (optional) from a directory.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let entities_path = dir.join("entities.json");
    let raw = tokio::fs::read_to_string(&entities_path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", entities_path.display(), e)))?;
    let entities: Vec<EntityConfig> =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("entities.json: {}", e)))?;

    let routes: Vec<RouteConfig> = match tokio::fs::read_to_string(dir.join("routes.json")).await {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("routes.json: {}", e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(ConfigError::Load(format!("routes.json: {}", e))),
    };
    tracing::info!(
        dir = %dir.display(),
        entities = entities.len(),
        routes = routes.len(),
        "definitions loaded"
    );
    Ok(FullConfig { entities, routes })
}

/// Parse definitions from JSON strings (routes are optional).
pub fn from_json(entities: &str, routes: Option<&str>) -> Result<FullConfig, ConfigError> {
    let entities = serde_json::from_str(entities).map_err(|e| ConfigError::Load(format!("entities: {}", e)))?;
    let routes = match routes {
        Some(r) => serde_json::from_str(r).map_err(|e| ConfigError::Load(format!("routes: {}", e)))?,
        None => Vec::new(),
    };
    Ok(FullConfig { entities, routes })
}

/// Build the resolved model with permissive routes unless a definition says otherwise.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    resolve_with(config, false)
}

/// Build the resolved model (validates first). `strict_default` applies to routes that
/// do not set `strict` themselves.
pub fn resolve_with(config: &FullConfig, strict_default: bool) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let by_name: HashMap<&str, &EntityConfig> = config.entities.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut model = ResolvedModel::default();
    for e in &config.entities {
        let schema = Arc::new(resolve_entity(e, &by_name)?);
        model.entity_by_name.insert(e.name.clone(), schema.clone());
        model.entities.push(schema);
    }

    let mut routes = Vec::new();
    for e in &config.entities {
        let Some(schema) = model.entity(&e.name).cloned() else { continue };
        let strict = e.strict.unwrap_or(strict_default);
        for r in &e.routes {
            let action = RouteAction::parse(r)
                .ok_or_else(|| ConfigError::Validation(format!("{}: unknown route '{}'", e.name, r)))?;
            routes.push(Arc::new(default_route(&model, &schema, action, strict)?));
        }
    }
    for r in &config.routes {
        routes.push(Arc::new(custom_route(&model, r, strict_default)?));
    }

    let mut seen = HashSet::new();
    for r in &routes {
        if !seen.insert((r.method, r.path.clone())) {
            return Err(ConfigError::Duplicate {
                kind: "route",
                name: r.label(),
            });
        }
    }
    model.routes = routes;
    Ok(model)
}

fn declared_pk(e: &EntityConfig) -> Option<&FieldConfig> {
    e.fields.iter().find(|f| f.primary_key)
}

fn pk_name(e: &EntityConfig) -> String {
    declared_pk(e).map(|f| f.name.clone()).unwrap_or_else(|| "id".into())
}

fn generated_id() -> FieldSchema {
    FieldSchema {
        name: "id".into(),
        kind: DataKind::Integer,
        nullable: false,
        primary_key: true,
        auto_increment: true,
        unique: false,
        default: None,
        description: "Unique identifier".into(),
        reference: None,
        rules: Rules::default(),
    }
}

/// Data kind of `key` on `target`. Unresolvable keys fall back to a plain string.
fn key_kind(target: &EntityConfig, key: Option<&str>, by_name: &HashMap<&str, &EntityConfig>, hops: usize) -> DataKind {
    let key = key.map(str::to_string).unwrap_or_else(|| pk_name(target));
    let Some(field) = target.fields.iter().find(|f| f.name == key) else {
        return if declared_pk(target).is_none() && key == "id" {
            DataKind::Integer
        } else {
            DataKind::String { max_length: Some(255) }
        };
    };
    if let Some(t) = &field.type_ {
        if let Some(kind) = DataKind::parse(t.name(), t.length()) {
            return kind;
        }
    }
    match (&field.reference, hops < MAX_KEY_HOPS) {
        (Some(r), true) => match by_name.get(r.entity.as_str()) {
            Some(next) => key_kind(next, r.key.as_deref(), by_name, hops + 1),
            None => DataKind::String { max_length: Some(255) },
        },
        _ => DataKind::String { max_length: Some(255) },
    }
}

fn key_description(target: &EntityConfig, key: &str) -> String {
    target
        .fields
        .iter()
        .find(|f| f.name == key)
        .and_then(|f| f.description.clone())
        .unwrap_or_else(|| if key == "id" { "Unique identifier".into() } else { key.to_string() })
}

fn resolve_entity(e: &EntityConfig, by_name: &HashMap<&str, &EntityConfig>) -> Result<EntitySchema, ConfigError> {
    let mut fields = Vec::with_capacity(e.fields.len() + 1);
    if declared_pk(e).is_none() {
        if e.fields.iter().any(|f| f.name == "id") {
            return Err(ConfigError::Validation(format!(
                "{}: field 'id' must be the primary key or another field must be",
                e.name
            )));
        }
        fields.push(generated_id());
    }
    for f in &e.fields {
        fields.push(resolve_field(e, f, by_name)?);
    }
    Ok(EntitySchema::new(
        e.name.clone(),
        e.plural.clone().unwrap_or_else(|| format!("{}s", e.name)),
        e.description.clone().unwrap_or_default(),
        fields,
        pk_name(e),
        e.timestamps,
        e.paranoid,
    ))
}

fn resolve_field(
    e: &EntityConfig,
    f: &FieldConfig,
    by_name: &HashMap<&str, &EntityConfig>,
) -> Result<FieldSchema, ConfigError> {
    let declared = match &f.type_ {
        Some(t) => Some(DataKind::parse(t.name(), t.length()).ok_or_else(|| ConfigError::UnknownKind {
            entity: e.name.clone(),
            field: f.name.clone(),
            kind: t.name().to_string(),
        })?),
        None => None,
    };

    let mut description = f.description.clone();
    let (kind, reference) = match &f.reference {
        Some(r) => {
            let target = by_name.get(r.entity.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: r.entity.clone(),
            })?;
            let key = r.key.clone().unwrap_or_else(|| pk_name(target));
            let expected = key_kind(target, Some(&key), by_name, 0);
            let kind = match declared {
                Some(d) if std::mem::discriminant(&d) != std::mem::discriminant(&expected) => {
                    return Err(ConfigError::ReferenceKindMismatch {
                        entity: e.name.clone(),
                        field: f.name.clone(),
                        declared: d.to_string(),
                        target: r.entity.clone(),
                        expected: expected.to_string(),
                    });
                }
                Some(d) => d,
                None => expected,
            };
            if description.is_none() {
                description = Some(format!("{} of the '{}' record", key_description(target, &key), r.entity));
            }
            let cardinality = Cardinality::parse(&r.cardinality)
                .ok_or_else(|| ConfigError::Validation(format!("{}.{}: bad reference type", e.name, f.name)))?;
            let reference = Reference {
                target_entity: r.entity.clone(),
                alias: r.alias.clone().unwrap_or_else(|| r.entity.clone()),
                cardinality,
                key,
            };
            (kind, Some(reference))
        }
        None => (
            declared.ok_or_else(|| ConfigError::Validation(format!("{}.{} needs a type", e.name, f.name)))?,
            None,
        ),
    };

    let pattern = match &f.validation.pattern {
        Some(p) => Some(Regex::new(p).map_err(|err| {
            ConfigError::Validation(format!("{}.{}: invalid pattern: {}", e.name, f.name, err))
        })?),
        None => None,
    };

    Ok(FieldSchema {
        name: f.name.clone(),
        kind,
        nullable: f.nullable && !f.primary_key,
        primary_key: f.primary_key,
        auto_increment: f.auto_increment,
        unique: f.unique,
        default: f.default.clone(),
        description: description.unwrap_or_default(),
        reference,
        rules: Rules {
            min_length: f.validation.min_length,
            max_length: f.validation.max_length,
            pattern,
            allowed: f.validation.allowed.clone(),
            minimum: f.validation.minimum,
            maximum: f.validation.maximum,
        },
    })
}

fn item(name: &str, kind: OutputKind) -> OutputItem {
    OutputItem {
        name: name.to_string(),
        kind,
    }
}

/// Own fields, timestamps, and to-one references up to `levels` deep. `path` holds the
/// entities on the current branch so mutually referencing entities stop recursing.
fn default_node(model: &ResolvedModel, entity: &EntitySchema, levels: usize, path: &mut Vec<String>) -> OutputNode {
    path.push(entity.name.clone());
    let mut items: Vec<OutputItem> = entity
        .fields
        .iter()
        .map(|f| item(&f.name, OutputKind::Field { source: f.name.clone() }))
        .collect();
    if entity.timestamps {
        items.push(item(CREATED_AT_OUTPUT, OutputKind::Computed(Timestamp::Created)));
        items.push(item(UPDATED_AT_OUTPUT, OutputKind::Computed(Timestamp::Updated)));
    }
    if levels > 1 {
        for f in &entity.fields {
            let Some(r) = &f.reference else { continue };
            if path.contains(&r.target_entity) {
                continue;
            }
            let Some(target) = model.entity(&r.target_entity) else { continue };
            let node = default_node(model, target, levels - 1, path);
            items.push(item(
                &r.alias,
                OutputKind::Relation(Relation {
                    alias: r.alias.clone(),
                    entity: target.name.clone(),
                    direction: RelationDirection::ToOne,
                    our_key: f.name.clone(),
                    their_key: r.key.clone(),
                    node,
                }),
            ));
        }
    }
    path.pop();
    OutputNode {
        entity: entity.name.clone(),
        items,
    }
}

fn default_route(
    model: &ResolvedModel,
    entity: &EntitySchema,
    action: RouteAction,
    strict: bool,
) -> Result<RouteSpec, ConfigError> {
    let pk = entity.pk_field().ok_or_else(|| ConfigError::InvalidPrimaryKey {
        entity: entity.name.clone(),
        fields: entity.primary_key.clone(),
    })?;
    let base = format!("{}/{}", API_PREFIX, entity.plural);
    let by_id = format!("{}/:{}", base, pk.name);
    let id_params = vec![ParamField {
        name: pk.name.clone(),
        field: pk.clone(),
    }];
    let read_template = |many: bool| OutputTemplate {
        metadata: many,
        many,
        root: default_node(model, entity, DEFAULT_INCLUDE_LEVELS, &mut Vec::new()),
    };

    let (method, path, description, input, output) = match action {
        RouteAction::List => (
            RouteMethod::Get,
            base,
            "Returns a list of records.",
            InputSchema {
                query: entity.fields.iter().map(FieldSchema::as_optional).collect(),
                ..InputSchema::default()
            },
            Some(read_template(true)),
        ),
        RouteAction::Get => (
            RouteMethod::Get,
            by_id,
            "Returns a record by ID.",
            InputSchema {
                params: id_params,
                ..InputSchema::default()
            },
            Some(read_template(false)),
        ),
        RouteAction::Create => (
            RouteMethod::Post,
            base,
            "Creates a new record.",
            InputSchema {
                body: entity
                    .fields
                    .iter()
                    .filter(|f| !(f.primary_key && f.auto_increment))
                    .cloned()
                    .map(BodyNode::Field)
                    .collect(),
                ..InputSchema::default()
            },
            Some(OutputTemplate {
                metadata: false,
                many: false,
                root: default_node(model, entity, 1, &mut Vec::new()),
            }),
        ),
        RouteAction::Update => (
            RouteMethod::Put,
            by_id,
            "Updates a record by ID.",
            InputSchema {
                params: id_params,
                body: entity
                    .fields
                    .iter()
                    .filter(|f| !f.primary_key)
                    .cloned()
                    .map(BodyNode::Field)
                    .collect(),
                partial_body: true,
                ..InputSchema::default()
            },
            None,
        ),
        RouteAction::Delete => (
            RouteMethod::Delete,
            by_id,
            "Deletes a record by ID.",
            InputSchema {
                params: id_params,
                ..InputSchema::default()
            },
            None,
        ),
        RouteAction::Restore => (
            RouteMethod::Put,
            format!("{}/restore", by_id),
            "Restores a deleted record by ID.",
            InputSchema {
                params: id_params,
                ..InputSchema::default()
            },
            None,
        ),
    };

    Ok(RouteSpec {
        method,
        path,
        description: description.to_string(),
        entity: entity.name.clone(),
        action,
        input,
        output,
        strict,
    })
}

/// `true` → same-named field of `entity`; "entity.field" or "field" → that field.
fn field_ref(model: &ResolvedModel, entity: &EntitySchema, key: &str, v: &Value) -> Result<FieldSchema, ConfigError> {
    let (entity_name, field_name) = match v {
        Value::Bool(true) => (entity.name.as_str(), key),
        Value::String(s) => s.split_once('.').unwrap_or((entity.name.as_str(), s.as_str())),
        other => {
            return Err(ConfigError::Validation(format!(
                "{}: expected true or \"entity.field\", got {}",
                key, other
            )))
        }
    };
    let target = model.entity(entity_name).ok_or_else(|| ConfigError::MissingReference {
        kind: "entity",
        id: entity_name.to_string(),
    })?;
    target
        .field(field_name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingReference {
            kind: "field",
            id: format!("{}.{}", entity_name, field_name),
        })
}

/// Path params always filter the route's own entity: "other.key" binds to the field of
/// `entity` that references it.
fn param_field(
    model: &ResolvedModel,
    entity: &EntitySchema,
    name: &str,
    v: &Value,
    label: &str,
) -> Result<FieldSchema, ConfigError> {
    let target = field_ref(model, entity, name, v)?;
    let other = match v {
        Value::String(s) => s.split_once('.').map(|(e, _)| e).filter(|e| *e != entity.name),
        _ => None,
    };
    let Some(other) = other else { return Ok(target) };
    entity
        .fields
        .iter()
        .find(|f| {
            f.reference
                .as_ref()
                .map(|r| r.target_entity == other && r.key == target.name)
                .unwrap_or(false)
        })
        .cloned()
        .ok_or_else(|| {
            ConfigError::Validation(format!(
                "{}: param '{}' names {}.{} but '{}' has no field referencing it",
                label, name, other, target.name, entity.name
            ))
        })
}

fn relation(model: &ResolvedModel, entity: &EntitySchema, alias: &str) -> Result<Link, ConfigError> {
    model.relation(entity, alias).ok_or_else(|| ConfigError::MissingReference {
        kind: "relation",
        id: format!("{}.{}", entity.name, alias),
    })
}

fn resolve_body(
    model: &ResolvedModel,
    entity: &EntitySchema,
    body: &Map<String, Value>,
    depth: usize,
    label: &str,
) -> Result<Vec<BodyNode>, ConfigError> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(ConfigError::TemplateTooDeep {
            route: label.to_string(),
            limit: MAX_TEMPLATE_DEPTH,
        });
    }
    let mut nodes = Vec::with_capacity(body.len());
    for (key, v) in body {
        if is_computed_name(key) {
            return Err(ConfigError::Validation(format!("{}: '{}' is computed and cannot be input", label, key)));
        }
        match v {
            Value::Object(children) => {
                let link = relation(model, entity, key)?;
                nodes.push(BodyNode::Nested {
                    name: key.clone(),
                    children: resolve_body(model, &link.target, children, depth + 1, label)?,
                });
            }
            _ => nodes.push(BodyNode::Field(field_ref(model, entity, key, v)?.renamed(key))),
        }
    }
    Ok(nodes)
}

fn template_node(
    model: &ResolvedModel,
    entity: &EntitySchema,
    fields: &Map<String, Value>,
    depth: usize,
    label: &str,
) -> Result<OutputNode, ConfigError> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(ConfigError::TemplateTooDeep {
            route: label.to_string(),
            limit: MAX_TEMPLATE_DEPTH,
        });
    }
    let timestamp = |ts: Timestamp| {
        if entity.timestamps {
            Ok(OutputKind::Computed(ts))
        } else {
            Err(ConfigError::Validation(format!("{}: '{}' has no timestamps", label, entity.name)))
        }
    };
    let mut items = Vec::with_capacity(fields.len());
    for (key, v) in fields {
        let kind = match v {
            Value::Bool(false) => continue,
            Value::Bool(true) if key == CREATED_AT_OUTPUT => timestamp(Timestamp::Created)?,
            Value::Bool(true) if key == UPDATED_AT_OUTPUT => timestamp(Timestamp::Updated)?,
            Value::String(s) if s == CREATED_AT => timestamp(Timestamp::Created)?,
            Value::String(s) if s == UPDATED_AT => timestamp(Timestamp::Updated)?,
            Value::Object(children) => {
                let link = relation(model, entity, key)?;
                let node = template_node(model, &link.target, children, depth + 1, label)?;
                OutputKind::Relation(Relation {
                    alias: key.clone(),
                    entity: link.target.name.clone(),
                    direction: link.direction,
                    our_key: link.our_key,
                    their_key: link.their_key,
                    node,
                })
            }
            _ => {
                let f = field_ref(model, entity, key, v)?;
                if entity.field(&f.name).map(|own| own.name != f.name).unwrap_or(true) {
                    return Err(ConfigError::Validation(format!(
                        "{}: output field '{}' is not a field of '{}'",
                        label, key, entity.name
                    )));
                }
                OutputKind::Field { source: f.name }
            }
        };
        items.push(item(key, kind));
    }
    Ok(OutputNode {
        entity: entity.name.clone(),
        items,
    })
}

fn custom_route(model: &ResolvedModel, r: &RouteConfig, strict_default: bool) -> Result<RouteSpec, ConfigError> {
    let method = RouteMethod::parse(&r.method)
        .ok_or_else(|| ConfigError::Validation(format!("unknown method '{}'", r.method)))?;
    let action = RouteAction::parse(&r.action)
        .ok_or_else(|| ConfigError::Validation(format!("unknown action '{}'", r.action)))?;
    let entity = model.entity(&r.entity).cloned().ok_or_else(|| ConfigError::MissingReference {
        kind: "entity",
        id: r.entity.clone(),
    })?;
    let label = format!("{} {}", method, r.path);

    let mut params = Vec::with_capacity(r.input.params.len());
    for (name, v) in &r.input.params {
        params.push(ParamField {
            name: name.clone(),
            field: param_field(model, &entity, name, v, &label)?,
        });
    }

    let mut query = Vec::with_capacity(r.input.query.len());
    for (name, v) in &r.input.query {
        let f = field_ref(model, &entity, name, v)?;
        if f.name != *name || entity.field(name).is_none() {
            return Err(ConfigError::Validation(format!(
                "{}: query field '{}' must be a field of '{}'",
                label, name, entity.name
            )));
        }
        query.push(f);
    }

    let body = resolve_body(model, &entity, &r.input.body, 1, &label)?;
    if action != RouteAction::Create && body.iter().any(|n| matches!(n, BodyNode::Nested { .. })) {
        return Err(ConfigError::Validation(format!(
            "{}: nested bodies are only accepted by create routes",
            label
        )));
    }
    let output = match &r.output {
        Some(o) => Some(OutputTemplate {
            metadata: o.metadata,
            many: o.many,
            root: template_node(model, &entity, &o.fields, 1, &label)?,
        }),
        None => None,
    };

    Ok(RouteSpec {
        method,
        path: r.path.clone(),
        description: r.description.clone().unwrap_or_default(),
        entity: entity.name.clone(),
        action,
        input: InputSchema {
            params,
            query,
            body,
            partial_body: action == RouteAction::Update,
        },
        output,
        strict: r.strict.unwrap_or(strict_default),
    })
}
