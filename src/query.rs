//! Normalized filter, sort, pagination and include directives handed to the accessor.

use crate::config::{OutputKind, OutputNode, RelationDirection};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring match.
    Like,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<FilterOp> {
        Some(match s {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            _ => return None,
        })
    }

    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "ILIKE",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// 1-based page number.
    pub fn page(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }
}

/// Related rows to fetch alongside the main row, nested the way the output template nests them.
#[derive(Clone, Debug, PartialEq)]
pub struct Include {
    pub alias: String,
    pub entity: String,
    pub direction: RelationDirection,
    pub our_key: String,
    pub their_key: String,
    pub includes: Vec<Include>,
}

impl Include {
    /// Include tree mirroring the relations an output node requests.
    pub fn from_node(node: &OutputNode) -> Vec<Include> {
        node.items
            .iter()
            .filter_map(|item| match &item.kind {
                OutputKind::Relation(r) => Some(Include {
                    alias: r.alias.clone(),
                    entity: r.entity.clone(),
                    direction: r.direction,
                    our_key: r.our_key.clone(),
                    their_key: r.their_key.clone(),
                    includes: Include::from_node(&r.node),
                }),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub pagination: Option<Pagination>,
    pub sort: Vec<Sort>,
    pub includes: Vec<Include>,
}

impl QueryOptions {
    pub fn eq(mut self, field: &str, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op: FilterOp::Eq,
            value,
        });
        self
    }
}
