//! Resolved route declarations: method, path, input schema and output template.

use crate::config::resolved::FieldSchema;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RouteMethod {
    pub fn parse(s: &str) -> Option<RouteMethod> {
        match s.to_uppercase().as_str() {
            "GET" => Some(RouteMethod::Get),
            "POST" => Some(RouteMethod::Post),
            "PUT" => Some(RouteMethod::Put),
            "PATCH" => Some(RouteMethod::Patch),
            "DELETE" => Some(RouteMethod::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        })
    }
}

/// Accessor call a route performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    List,
    Get,
    Create,
    Update,
    Delete,
    Restore,
}

impl RouteAction {
    pub fn parse(s: &str) -> Option<RouteAction> {
        match s.to_lowercase().as_str() {
            "list" => Some(RouteAction::List),
            "get" | "read" => Some(RouteAction::Get),
            "create" => Some(RouteAction::Create),
            "update" => Some(RouteAction::Update),
            "delete" | "destroy" => Some(RouteAction::Delete),
            "restore" => Some(RouteAction::Restore),
            _ => None,
        }
    }
}

/// One declared body entry: a field, or a nested object keyed by relation alias.
#[derive(Clone, Debug)]
pub enum BodyNode {
    Field(FieldSchema),
    Nested { name: String, children: Vec<BodyNode> },
}

/// Path placeholder bound to an entity field (`:id_curso` → `curso.id`).
#[derive(Clone, Debug)]
pub struct ParamField {
    pub name: String,
    pub field: FieldSchema,
}

#[derive(Clone, Debug, Default)]
pub struct InputSchema {
    pub params: Vec<ParamField>,
    pub query: Vec<FieldSchema>,
    pub body: Vec<BodyNode>,
    /// Absent body fields are skipped instead of reported (update routes).
    pub partial_body: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationDirection {
    /// At most one related row; renders as an object or null.
    ToOne,
    /// Any number of related rows; renders as a list.
    ToMany,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timestamp {
    Created,
    Updated,
}

#[derive(Clone, Debug)]
pub enum OutputKind {
    Field { source: String },
    Computed(Timestamp),
    Relation(Relation),
}

#[derive(Clone, Debug)]
pub struct Relation {
    pub alias: String,
    pub entity: String,
    pub direction: RelationDirection,
    pub our_key: String,
    pub their_key: String,
    pub node: OutputNode,
}

#[derive(Clone, Debug)]
pub struct OutputItem {
    pub name: String,
    pub kind: OutputKind,
}

#[derive(Clone, Debug)]
pub struct OutputNode {
    pub entity: String,
    pub items: Vec<OutputItem>,
}

impl OutputNode {
    pub fn depth(&self) -> usize {
        1 + self
            .items
            .iter()
            .filter_map(|i| match &i.kind {
                OutputKind::Relation(r) => Some(r.node.depth()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct OutputTemplate {
    pub metadata: bool,
    pub many: bool,
    pub root: OutputNode,
}

#[derive(Clone, Debug)]
pub struct RouteSpec {
    pub method: RouteMethod,
    /// axum path template, e.g. `/api/v1/autores/:id`.
    pub path: String,
    pub description: String,
    pub entity: String,
    pub action: RouteAction,
    pub input: InputSchema,
    pub output: Option<OutputTemplate>,
    pub strict: bool,
}

impl RouteSpec {
    /// Route name used in logs.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
