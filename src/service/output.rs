//! Output shaping: copy the fields an output template asks for, in template order.

use crate::config::{OutputKind, OutputNode, OutputTemplate, Timestamp, CREATED_AT, UPDATED_AT};
use serde_json::{Map, Value};

pub struct OutputShaper;

impl OutputShaper {
    /// `rows` is one row or a list of rows. List templates always produce a list.
    pub fn shape(rows: &Value, template: &OutputTemplate) -> Value {
        match (template.many, rows) {
            (true, Value::Array(items)) => Value::Array(items.iter().map(|r| Self::shape_node(r, &template.root)).collect()),
            (true, Value::Null) => Value::Array(Vec::new()),
            (true, row) => Value::Array(vec![Self::shape_node(row, &template.root)]),
            (false, row) => Self::shape_node(row, &template.root),
        }
    }

    /// A missing related row renders as null; a list of related rows is shaped item by item.
    pub fn shape_node(row: &Value, node: &OutputNode) -> Value {
        let Value::Object(source) = row else { return Value::Null };
        let mut out = Map::with_capacity(node.items.len());
        for item in &node.items {
            let v = match &item.kind {
                OutputKind::Field { source: name } => source.get(name).cloned().unwrap_or(Value::Null),
                OutputKind::Computed(Timestamp::Created) => source.get(CREATED_AT).cloned().unwrap_or(Value::Null),
                OutputKind::Computed(Timestamp::Updated) => source.get(UPDATED_AT).cloned().unwrap_or(Value::Null),
                OutputKind::Relation(r) => match source.get(&r.alias) {
                    Some(Value::Array(items)) => Value::Array(items.iter().map(|i| Self::shape_node(i, &r.node)).collect()),
                    Some(related @ Value::Object(_)) => Self::shape_node(related, &r.node),
                    _ => Value::Null,
                },
            };
            out.insert(item.name.clone(), v);
        }
        Value::Object(out)
    }
}
