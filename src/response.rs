//! Standard response envelope and the emitter seam the executor writes through.

use crate::error::ErrorBody;
use crate::query::Pagination;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// Pagination summary attached to list responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub total_count: u64,
    pub count_returned: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl Metadata {
    pub fn new(count_returned: u64, total_count: u64, pagination: &Pagination) -> Self {
        let limit = pagination.limit.max(1);
        Metadata {
            total_count,
            count_returned,
            page: pagination.page(),
            limit,
            total_pages: total_count.div_ceil(limit),
        }
    }
}

#[derive(Serialize)]
pub struct SuccessBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Writes the final response. Taking `self` by value means a request can emit once.
pub trait ResponseEmitter {
    type Output;

    fn emit_success(self, status: StatusCode, data: Option<Value>, metadata: Option<Metadata>) -> Self::Output;

    fn emit_error(self, status: StatusCode, body: ErrorBody) -> Self::Output;
}

/// Emits the JSON envelope as an axum response.
pub struct JsonEmitter;

impl ResponseEmitter for JsonEmitter {
    type Output = Response;

    fn emit_success(self, status: StatusCode, data: Option<Value>, metadata: Option<Metadata>) -> Response {
        (status, Json(SuccessBody { data, metadata })).into_response()
    }

    fn emit_error(self, status: StatusCode, body: ErrorBody) -> Response {
        (status, Json(body)).into_response()
    }
}
