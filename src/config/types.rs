//! Raw declarative config types matching the JSON definitions (entities.json + routes.json).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTypeConfig {
    Simple(String),
    Parameterized {
        name: String,
        #[serde(default)]
        length: Option<u32>,
    },
}

impl FieldTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            FieldTypeConfig::Simple(s) => s,
            FieldTypeConfig::Parameterized { name, .. } => name,
        }
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            FieldTypeConfig::Simple(_) => None,
            FieldTypeConfig::Parameterized { length, .. } => *length,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub entity: String,
    /// Relation alias; defaults to the target entity name.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    /// "1:1" or "1:N".
    #[serde(default = "default_cardinality", rename = "type")]
    pub cardinality: String,
    /// Target field the reference points at; defaults to the target primary key.
    #[serde(default)]
    pub key: Option<String>,
}

fn default_cardinality() -> String {
    "1:N".into()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// Omitted for reference fields, which take the target key's type.
    #[serde(default, rename = "type")]
    pub type_: Option<FieldTypeConfig>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<ReferenceConfig>,
    #[serde(default)]
    pub validation: ValidationRule,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    /// Path segment under /api/v1; defaults to `name` + "s".
    #[serde(default)]
    pub plural: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldConfig>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Soft delete: rows get `deleted_at` instead of being removed, enabling restore.
    #[serde(default)]
    pub paranoid: bool,
    /// Generated CRUD routes: any of list, get, create, update, delete, restore.
    #[serde(default)]
    pub routes: Vec<String>,
    /// Reject undeclared query/body keys on the generated routes.
    #[serde(default)]
    pub strict: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub metadata: bool,
    /// `data` is a list of rows instead of a single row.
    #[serde(default)]
    pub many: bool,
    /// Output name → `true` (same-named field), "entity.field", "created_at"/"updated_at",
    /// or a nested object for a relation alias.
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteConfig {
    pub method: String,
    pub path: String,
    pub entity: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: Option<OutputConfig>,
    #[serde(default)]
    pub strict: Option<bool>,
}

/// All definitions in one struct for in-memory loading.
#[derive(Clone, Debug, Default)]
pub struct FullConfig {
    pub entities: Vec<EntityConfig>,
    pub routes: Vec<RouteConfig>,
}
