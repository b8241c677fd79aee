//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: entity {entity} declares more than one ({fields})")]
    InvalidPrimaryKey { entity: String, fields: String },
    #[error("duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },
    #[error("unknown data kind '{kind}' on {entity}.{field}")]
    UnknownKind { entity: String, field: String, kind: String },
    #[error("reference {entity}.{field} declares kind {declared} but {target} key is {expected}")]
    ReferenceKindMismatch {
        entity: String,
        field: String,
        declared: String,
        target: String,
        expected: String,
    },
    #[error("output template for {route} exceeds depth {limit}")]
    TemplateTooDeep { route: String, limit: usize },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// One rejected input field. `field` is the dotted path for nested bodies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
}

/// Failure reported by a data accessor. Constraint signals are kept apart so the
/// executor can classify them as conflicts.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("constraint violation: {message}")]
    Constraint { kind: ConstraintKind, message: String },
    #[error("{0}")]
    Failure(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid input: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    #[error("no '{entity}' record found with {field} = '{value}'")]
    NotFound {
        entity: String,
        field: String,
        value: String,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<sqlx::Error> for AccessError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        if let sqlx::Error::Database(db) = &e {
            let kind = match db.kind() {
                ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                _ => None,
            };
            if let Some(kind) = kind {
                // Postgres puts "Key (col)=(value) ..." into the detail field.
                let message = db
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string)
                    .unwrap_or_else(|| db.message().to_string());
                return AccessError::Constraint { kind, message };
            }
        }
        AccessError::Failure(e.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl AppError {
    /// Builds the error for an accessor failure raised while handling `entity`.
    pub fn from_access(entity: &str, err: AccessError) -> Self {
        match err {
            AccessError::Constraint { kind, message } => {
                let what = match kind {
                    ConstraintKind::Unique => "must be unique",
                    ConstraintKind::ForeignKey => "violates a reference",
                };
                AppError::Conflict(format!("'{}' record with {} {}", entity, message, what))
            }
            AccessError::Failure(msg) => AppError::Internal(msg),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing body. Internal detail is replaced when `production` is set.
    pub fn to_body(&self, production: bool) -> ErrorBody {
        let hide = production && matches!(self, AppError::Config(_) | AppError::Internal(_));
        let message = if hide {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let fields = match self {
            AppError::Validation(errors) => Some(errors.clone()),
            _ => None,
        };
        ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                fields,
            },
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body(false))).into_response()
    }
}
