//! Resolved entity model: definitions validated and flattened for runtime use.

use crate::config::route::{RelationDirection, RouteSpec};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Storage names of the computed timestamp columns.
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

/// Output names of the computed timestamps.
pub const CREATED_AT_OUTPUT: &str = "_fecha_creacion";
pub const UPDATED_AT_OUTPUT: &str = "_fecha_modificacion";
pub const DELETED_AT_OUTPUT: &str = "_fecha_eliminacion";

/// True for keys a client may never write (storage or output spelling).
pub fn is_computed_name(name: &str) -> bool {
    matches!(
        name,
        CREATED_AT | UPDATED_AT | DELETED_AT | CREATED_AT_OUTPUT | UPDATED_AT_OUTPUT | DELETED_AT_OUTPUT
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataKind {
    String { max_length: Option<u32> },
    Text,
    Integer,
    Float,
    Date,
    DateTime,
    Boolean,
    Uuid,
}

impl DataKind {
    pub fn parse(name: &str, length: Option<u32>) -> Option<DataKind> {
        Some(match name.to_lowercase().as_str() {
            "string" | "varchar" => DataKind::String {
                max_length: length.or(Some(255)),
            },
            "text" => DataKind::Text,
            "integer" | "int" | "bigint" => DataKind::Integer,
            "float" | "double" | "decimal" | "numeric" => DataKind::Float,
            "date" | "dateonly" => DataKind::Date,
            "datetime" | "timestamp" => DataKind::DateTime,
            "boolean" | "bool" => DataKind::Boolean,
            "uuid" => DataKind::Uuid,
            _ => return None,
        })
    }

    /// PostgreSQL column type for DDL and parameter casts.
    pub fn pg_type(&self) -> String {
        match self {
            DataKind::String { max_length: Some(n) } => format!("varchar({})", n),
            DataKind::String { max_length: None } | DataKind::Text => "text".into(),
            DataKind::Integer => "bigint".into(),
            DataKind::Float => "double precision".into(),
            DataKind::Date => "date".into(),
            DataKind::DateTime => "timestamptz".into(),
            DataKind::Boolean => "boolean".into(),
            DataKind::Uuid => "uuid".into(),
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataKind::String { .. } => "string",
            DataKind::Text => "text",
            DataKind::Integer => "integer",
            DataKind::Float => "float",
            DataKind::Date => "date",
            DataKind::DateTime => "datetime",
            DataKind::Boolean => "boolean",
            DataKind::Uuid => "uuid",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
}

impl Cardinality {
    pub fn parse(s: &str) -> Option<Cardinality> {
        match s {
            "1:1" => Some(Cardinality::OneToOne),
            "1:N" | "1:n" => Some(Cardinality::OneToMany),
            _ => None,
        }
    }
}

/// Relation carried by a foreign-key field.
#[derive(Clone, Debug)]
pub struct Reference {
    pub target_entity: String,
    pub alias: String,
    pub cardinality: Cardinality,
    /// Field of the target entity this one points at.
    pub key: String,
}

/// Extra constraints on top of the data kind.
#[derive(Clone, Debug, Default)]
pub struct Rules {
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub pattern: Option<Regex>,
    pub allowed: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct FieldSchema {
    pub name: String,
    pub kind: DataKind,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default: Option<Value>,
    pub description: String,
    pub reference: Option<Reference>,
    pub rules: Rules,
}

impl FieldSchema {
    /// Required means the request must supply a value.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    /// Same field with presence relaxed, used for filters and partial updates.
    pub fn as_optional(&self) -> FieldSchema {
        FieldSchema {
            nullable: true,
            default: None,
            ..self.clone()
        }
    }

    /// Copy exposed under another input name (e.g. `:id_curso` bound to `id`).
    pub fn renamed(&self, name: &str) -> FieldSchema {
        FieldSchema {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug)]
pub struct EntitySchema {
    pub name: String,
    /// Path segment of the generated routes.
    pub plural: String,
    pub description: String,
    /// Declaration order is kept: it drives default templates and DDL.
    pub fields: Vec<FieldSchema>,
    pub primary_key: String,
    pub timestamps: bool,
    pub paranoid: bool,
    index: HashMap<String, usize>,
}

impl EntitySchema {
    pub fn new(
        name: String,
        plural: String,
        description: String,
        fields: Vec<FieldSchema>,
        primary_key: String,
        timestamps: bool,
        paranoid: bool,
    ) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        EntitySchema {
            name,
            plural,
            description,
            fields,
            primary_key,
            timestamps,
            paranoid,
            index,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn pk_field(&self) -> Option<&FieldSchema> {
        self.field(&self.primary_key)
    }

    /// Field carrying the relation with the given alias, if any.
    pub fn reference_by_alias(&self, alias: &str) -> Option<&FieldSchema> {
        self.fields
            .iter()
            .find(|f| f.reference.as_ref().map(|r| r.alias == alias).unwrap_or(false))
    }

    /// Stored column names, computed timestamps included.
    pub fn column_names(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        if self.timestamps {
            cols.push(CREATED_AT);
            cols.push(UPDATED_AT);
        }
        if self.paranoid {
            cols.push(DELETED_AT);
        }
        cols
    }
}

/// How `alias` connects an entity to a related one.
#[derive(Clone, Debug)]
pub struct Link {
    pub target: Arc<EntitySchema>,
    pub direction: RelationDirection,
    /// Column on the entity side of the join.
    pub our_key: String,
    /// Column on the related side of the join.
    pub their_key: String,
    /// `our_key` is a reference field of the entity, so the related row must exist first.
    pub holds_key: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub entities: Vec<Arc<EntitySchema>>,
    pub entity_by_name: HashMap<String, Arc<EntitySchema>>,
    pub routes: Vec<Arc<RouteSpec>>,
}

impl ResolvedModel {
    pub fn entity(&self, name: &str) -> Option<&Arc<EntitySchema>> {
        self.entity_by_name.get(name)
    }

    pub fn entity_by_plural(&self, plural: &str) -> Option<&Arc<EntitySchema>> {
        self.entities.iter().find(|e| e.plural == plural)
    }

    /// Relation reachable from `entity` under `alias`: a reference field of `entity`, or a
    /// reference of another entity pointing back (plural alias → to-many, 1:1 by name → to-one).
    pub fn relation(&self, entity: &EntitySchema, alias: &str) -> Option<Link> {
        if let Some(f) = entity.reference_by_alias(alias) {
            let r = f.reference.as_ref()?;
            return Some(Link {
                target: self.entity(&r.target_entity)?.clone(),
                direction: RelationDirection::ToOne,
                our_key: f.name.clone(),
                their_key: r.key.clone(),
                holds_key: true,
            });
        }
        for other in &self.entities {
            for f in &other.fields {
                let Some(r) = &f.reference else { continue };
                if r.target_entity != entity.name {
                    continue;
                }
                let direction = if other.plural == alias {
                    RelationDirection::ToMany
                } else if other.name == alias && r.cardinality == Cardinality::OneToOne {
                    RelationDirection::ToOne
                } else {
                    continue;
                };
                return Some(Link {
                    target: other.clone(),
                    direction,
                    our_key: r.key.clone(),
                    their_key: f.name.clone(),
                    holds_key: false,
                });
            }
        }
        None
    }
}
