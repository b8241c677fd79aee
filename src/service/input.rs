//! Input resolution: path params, query string and body checked against a route's
//! declared input, producing coerced values and the accessor's QueryOptions.

use crate::config::{
    is_computed_name, BodyNode, EntitySchema, FieldSchema, RouteAction, RouteSpec, CREATED_AT, CREATED_AT_OUTPUT,
    UPDATED_AT, UPDATED_AT_OUTPUT,
};
use crate::error::FieldError;
use crate::query::{Direction, Filter, FilterOp, Include, Pagination, QueryOptions, Sort};
use crate::service::validation::{check_field, Validator};
use crate::settings::Settings;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Raw request pieces as the transport delivered them.
#[derive(Clone, Debug, Default)]
pub struct RequestParts {
    pub params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Coerced values per source plus derived query options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedInput {
    pub params: Map<String, Value>,
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
    pub options: QueryOptions,
}

pub struct InputResolver<'a> {
    settings: &'a Settings,
}

impl<'a> InputResolver<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        InputResolver { settings }
    }

    /// Every field error of the request is collected before failing.
    pub fn resolve(
        &self,
        route: &RouteSpec,
        entity: &EntitySchema,
        request: &RequestParts,
    ) -> Result<ResolvedInput, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut out = ResolvedInput::default();

        for p in &route.input.params {
            let raw = request.params.get(&p.name).map(|s| Value::String(s.clone()));
            match check_field(&p.field, &p.name, raw.as_ref()) {
                Ok(Some(v)) => {
                    out.options.filters.push(Filter {
                        field: p.field.name.clone(),
                        op: FilterOp::Eq,
                        value: v.clone(),
                    });
                    out.params.insert(p.name.clone(), v);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        self.resolve_query(route, entity, &request.query, &mut out, &mut errors);

        let empty = Map::new();
        let body = match &request.body {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(m)) => m,
            Some(_) => {
                errors.push(FieldError::new("body", "must be a JSON object"));
                &empty
            }
        };
        resolve_body(
            &route.input.body,
            body,
            "",
            route.input.partial_body,
            route.strict,
            &mut errors,
            &mut out.body,
        );

        if let Some(template) = &route.output {
            out.options.includes = Include::from_node(&template.root);
        }

        if errors.is_empty() {
            tracing::debug!(route = %route.label(), options = ?out.options, "input resolved");
            Ok(out)
        } else {
            Err(errors)
        }
    }

    fn resolve_query(
        &self,
        route: &RouteSpec,
        entity: &EntitySchema,
        query: &[(String, String)],
        out: &mut ResolvedInput,
        errors: &mut Vec<FieldError>,
    ) {
        let declared: HashMap<&str, &FieldSchema> = route.input.query.iter().map(|f| (f.name.as_str(), f)).collect();
        let mut present: HashSet<&str> = HashSet::new();
        let mut page: Option<u64> = None;
        let mut limit: Option<u64> = None;

        for (key, raw) in query {
            match key.as_str() {
                "page" => match raw.trim().parse::<u64>() {
                    Ok(n) if n >= 1 => page = Some(n),
                    _ => errors.push(FieldError::new("page", "must be a positive integer")),
                },
                "limit" => match raw.trim().parse::<u64>() {
                    Ok(n) if n >= 1 => limit = Some(n),
                    _ => errors.push(FieldError::new("limit", "must be a positive integer")),
                },
                "order" => {
                    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let (name, direction) = match part.strip_prefix('-') {
                            Some(n) => (n, Direction::Desc),
                            None => (part.strip_prefix('+').unwrap_or(part), Direction::Asc),
                        };
                        let name = match name {
                            CREATED_AT_OUTPUT => CREATED_AT,
                            UPDATED_AT_OUTPUT => UPDATED_AT,
                            other => other,
                        };
                        let timestamp = entity.timestamps && (name == CREATED_AT || name == UPDATED_AT);
                        if !timestamp && entity.field(name).is_none() {
                            errors.push(FieldError::new(name, format!("is not a field of '{}'", entity.name)));
                            continue;
                        }
                        if !timestamp && !declared.contains_key(name) {
                            if route.strict {
                                errors.push(FieldError::new(name, "is not accepted by this route"));
                            }
                            continue;
                        }
                        out.options.sort.push(Sort {
                            field: name.to_string(),
                            direction,
                        });
                    }
                }
                _ => {
                    let (name, op) = match key.split_once('[') {
                        Some((name, rest)) => match rest.strip_suffix(']').and_then(FilterOp::parse) {
                            Some(op) => (name, op),
                            None => {
                                errors.push(FieldError::new(key.as_str(), "unknown filter operator"));
                                continue;
                            }
                        },
                        None => (key.as_str(), FilterOp::Eq),
                    };
                    if entity.field(name).is_none() {
                        errors.push(FieldError::new(name, format!("is not a field of '{}'", entity.name)));
                        continue;
                    }
                    let Some(field) = declared.get(name) else {
                        if route.strict {
                            errors.push(FieldError::new(name, "is not accepted by this route"));
                        }
                        continue;
                    };
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let value = if op == FilterOp::Like {
                        Value::String(raw.trim().to_string())
                    } else {
                        match Validator::for_field(field).validate(name, &Value::String(raw.clone())) {
                            Ok(v) => v,
                            Err(e) => {
                                errors.push(e);
                                continue;
                            }
                        }
                    };
                    present.insert(field.name.as_str());
                    out.query.insert(key.clone(), value.clone());
                    out.options.filters.push(Filter {
                        field: name.to_string(),
                        op,
                        value,
                    });
                }
            }
        }

        for f in &route.input.query {
            if present.contains(f.name.as_str()) {
                continue;
            }
            match check_field(f, &f.name, None) {
                Ok(Some(v)) => {
                    out.query.insert(f.name.clone(), v.clone());
                    out.options.filters.push(Filter {
                        field: f.name.clone(),
                        op: FilterOp::Eq,
                        value: v,
                    });
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        if route.action == RouteAction::List {
            let limit = limit
                .unwrap_or(self.settings.default_limit)
                .min(self.settings.max_limit)
                .max(1);
            let page = page.unwrap_or(1);
            // OFFSET is a bigint in PostgreSQL
            match (page - 1).checked_mul(limit).filter(|&o| o <= i64::MAX as u64) {
                Some(offset) => out.options.pagination = Some(Pagination { offset, limit }),
                None => errors.push(FieldError::new("page", "is out of range")),
            }
        }
    }
}

fn path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn node_name(node: &BodyNode) -> &str {
    match node {
        BodyNode::Field(f) => &f.name,
        BodyNode::Nested { name, .. } => name,
    }
}

fn resolve_body(
    nodes: &[BodyNode],
    body: &Map<String, Value>,
    prefix: &str,
    partial: bool,
    strict: bool,
    errors: &mut Vec<FieldError>,
    out: &mut Map<String, Value>,
) {
    for key in body.keys() {
        if is_computed_name(key) {
            errors.push(FieldError::new(path(prefix, key), "is computed and cannot be set"));
        } else if strict && !nodes.iter().any(|n| node_name(n) == key) {
            errors.push(FieldError::new(path(prefix, key), "is not accepted by this route"));
        }
    }

    for node in nodes {
        match node {
            BodyNode::Field(f) => {
                let raw = body.get(&f.name);
                if partial && raw.is_none() {
                    continue;
                }
                match check_field(f, &path(prefix, &f.name), raw) {
                    Ok(Some(v)) => {
                        out.insert(f.name.clone(), v);
                    }
                    Ok(None) => {}
                    Err(e) => errors.push(e),
                }
            }
            BodyNode::Nested { name, children } => {
                let nested_path = path(prefix, name);
                let empty = Map::new();
                let inner = match body.get(name) {
                    Some(Value::Object(inner)) => inner,
                    None | Some(Value::Null) if partial => continue,
                    None | Some(Value::Null) => &empty,
                    Some(_) => {
                        errors.push(FieldError::new(nested_path, "must be an object"));
                        continue;
                    }
                };
                let mut nested = Map::new();
                resolve_body(children, inner, &nested_path, partial, strict, errors, &mut nested);
                out.insert(name.clone(), Value::Object(nested));
            }
        }
    }
}
