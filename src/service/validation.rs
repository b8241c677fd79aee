//! Per-kind validation and coercion of raw input values.

use crate::config::{DataKind, FieldSchema};
use crate::error::FieldError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

/// Closed set of validators, one per data kind. Reference fields validate as their
/// target key; existence is left to the accessor.
#[derive(Clone, Debug, PartialEq)]
pub enum Validator {
    String { max_length: Option<u32> },
    Integer,
    Float,
    Date,
    DateTime,
    Boolean,
    Uuid,
    Reference(Box<Validator>),
}

impl Validator {
    pub fn for_field(field: &FieldSchema) -> Validator {
        let base = match &field.kind {
            DataKind::String { max_length } => Validator::String {
                max_length: *max_length,
            },
            DataKind::Text => Validator::String { max_length: None },
            DataKind::Integer => Validator::Integer,
            DataKind::Float => Validator::Float,
            DataKind::Date => Validator::Date,
            DataKind::DateTime => Validator::DateTime,
            DataKind::Boolean => Validator::Boolean,
            DataKind::Uuid => Validator::Uuid,
        };
        if field.reference.is_some() {
            Validator::Reference(Box::new(base))
        } else {
            base
        }
    }

    /// Coerce a present, non-empty value. `name` is reported on failure.
    pub fn validate(&self, name: &str, raw: &Value) -> Result<Value, FieldError> {
        let fail = |reason: &str| FieldError::new(name, reason);
        match self {
            Validator::Reference(inner) => inner.validate(name, raw),
            Validator::String { max_length } => {
                let s = raw.as_str().ok_or_else(|| fail("must be a string"))?.trim();
                if let Some(max) = max_length {
                    if s.chars().count() > *max as usize {
                        return Err(fail(&format!("must be at most {} characters", max)));
                    }
                }
                Ok(Value::String(s.to_string()))
            }
            Validator::Integer => {
                let n = match raw {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                n.map(|n| Value::Number(n.into())).ok_or_else(|| fail("must be an integer"))
            }
            Validator::Float => {
                let n = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                n.and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| fail("must be a number"))
            }
            Validator::Date => {
                let s = raw.as_str().map(str::trim).unwrap_or_default();
                parse_date(s)
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| fail("must be a valid date (YYYY-MM-DD)"))
            }
            Validator::DateTime => {
                let s = raw.as_str().map(str::trim).unwrap_or_default();
                parse_datetime(s)
                    .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                    .ok_or_else(|| fail("must be a valid ISO-8601 date-time"))
            }
            Validator::Boolean => {
                let b = match raw {
                    Value::Bool(b) => Some(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(1) => Some(true),
                        Some(0) => Some(false),
                        _ => None,
                    },
                    Value::String(s) => match s.trim() {
                        "true" | "1" => Some(true),
                        "false" | "0" => Some(false),
                        _ => None,
                    },
                    _ => None,
                };
                b.map(Value::Bool).ok_or_else(|| fail("must be true, false, 1 or 0"))
            }
            Validator::Uuid => raw
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
                .map(|u| Value::String(u.to_string()))
                .ok_or_else(|| fail("must be a valid UUID")),
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.date_naive()))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(d.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

/// Null, missing, and blank strings all count as "no value".
pub fn is_empty(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Presence check plus coercion for one declared field.
///
/// `Ok(None)` means the field was absent and may stay absent. An empty value on a
/// non-nullable field takes the declared default or fails.
pub fn check_field(field: &FieldSchema, name: &str, raw: Option<&Value>) -> Result<Option<Value>, FieldError> {
    if is_empty(raw) {
        if let Some(default) = &field.default {
            return Ok(Some(default.clone()));
        }
        if !field.nullable {
            return Err(FieldError::new(name, "is required"));
        }
        return Ok(raw.map(|_| Value::Null));
    }
    let Some(raw) = raw else { return Ok(None) };
    let value = Validator::for_field(field).validate(name, raw)?;
    check_rules(field, name, &value)?;
    Ok(Some(value))
}

/// Declared extra rules, applied to the coerced value.
pub fn check_rules(field: &FieldSchema, name: &str, v: &Value) -> Result<(), FieldError> {
    let rules = &field.rules;
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rules.max_length {
            if len > max as usize {
                return Err(FieldError::new(name, format!("must be at most {} characters", max)));
            }
        }
        if let Some(min) = rules.min_length {
            if len < min as usize {
                return Err(FieldError::new(name, format!("must be at least {} characters", min)));
            }
        }
        if let Some(re) = &rules.pattern {
            if !re.is_match(s) {
                return Err(FieldError::new(name, "does not match required pattern"));
            }
        }
    }
    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(FieldError::new(
                name,
                format!(
                    "must be one of: {}",
                    allowed.iter().take(5).map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
                ),
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rules.minimum {
            if n < min {
                return Err(FieldError::new(name, format!("must be at least {}", min)));
            }
        }
        if let Some(max) = rules.maximum {
            if n > max {
                return Err(FieldError::new(name, format!("must be at most {}", max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}
