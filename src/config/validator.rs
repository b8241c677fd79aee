//! Definition validation: referential integrity and route consistency.

use crate::config::resolved::{Cardinality, DataKind};
use crate::config::route::{RouteAction, RouteMethod};
use crate::config::FullConfig;
use crate::error::ConfigError;
use std::collections::HashSet;

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut plurals = HashSet::new();
    for e in &config.entities {
        if !names.insert(e.name.as_str()) {
            return Err(ConfigError::Duplicate {
                kind: "entity",
                name: e.name.clone(),
            });
        }
        let plural = e.plural.clone().unwrap_or_else(|| format!("{}s", e.name));
        if !plurals.insert(plural.clone()) {
            return Err(ConfigError::Duplicate {
                kind: "path segment",
                name: plural,
            });
        }
    }

    for e in &config.entities {
        let mut field_names = HashSet::new();
        let mut pks = Vec::new();
        for f in &e.fields {
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    kind: "field",
                    name: format!("{}.{}", e.name, f.name),
                });
            }
            if f.primary_key {
                pks.push(f.name.as_str());
            }
            if let Some(t) = &f.type_ {
                if DataKind::parse(t.name(), t.length()).is_none() {
                    return Err(ConfigError::UnknownKind {
                        entity: e.name.clone(),
                        field: f.name.clone(),
                        kind: t.name().to_string(),
                    });
                }
            } else if f.reference.is_none() {
                return Err(ConfigError::Validation(format!(
                    "{}.{} needs a type or a reference",
                    e.name, f.name
                )));
            }
            if let Some(r) = &f.reference {
                if !names.contains(r.entity.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "entity",
                        id: r.entity.clone(),
                    });
                }
                if Cardinality::parse(&r.cardinality).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "{}.{}: reference type must be 1:1 or 1:N, got '{}'",
                        e.name, f.name, r.cardinality
                    )));
                }
            }
        }
        if pks.len() > 1 {
            return Err(ConfigError::InvalidPrimaryKey {
                entity: e.name.clone(),
                fields: pks.join(", "),
            });
        }
        for r in &e.routes {
            match RouteAction::parse(r) {
                Some(RouteAction::Restore) if !e.paranoid => {
                    return Err(ConfigError::Validation(format!(
                        "{}: restore route requires a paranoid entity",
                        e.name
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(ConfigError::Validation(format!("{}: unknown route '{}'", e.name, r)));
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for r in &config.routes {
        let method = RouteMethod::parse(&r.method)
            .ok_or_else(|| ConfigError::Validation(format!("unknown method '{}' on {}", r.method, r.path)))?;
        if RouteAction::parse(&r.action).is_none() {
            return Err(ConfigError::Validation(format!("unknown action '{}' on {}", r.action, r.path)));
        }
        if !names.contains(r.entity.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "entity",
                id: r.entity.clone(),
            });
        }
        if !r.path.starts_with('/') {
            return Err(ConfigError::Validation(format!("route path must start with '/': {}", r.path)));
        }
        if !seen.insert((method, r.path.clone())) {
            return Err(ConfigError::Duplicate {
                kind: "route",
                name: format!("{} {}", method, r.path),
            });
        }
    }

    Ok(())
}
