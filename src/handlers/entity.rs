//! Declared-route handler: collect the raw request, run the route, emit JSON.

use crate::config::RouteSpec;
use crate::error::AppError;
use crate::response::JsonEmitter;
use crate::service::{RequestParts, RouteExecutor};
use crate::state::AppState;
use axum::{
    body::Bytes,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Empty bodies count as absent; anything else must be JSON.
fn parse_body(body: &Bytes) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::BadRequest(format!("malformed JSON body: {}", e)))
}

pub async fn execute(
    state: AppState,
    route: Arc<RouteSpec>,
    params: HashMap<String, String>,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Response {
    let body = match parse_body(&body) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(route = %route.label(), error = %e, "request rejected");
            return e.into_response();
        }
    };
    let request = RequestParts { params, query, body };
    tracing::debug!(route = %route.label(), ?request, "dispatch");
    RouteExecutor::new(&state.model, state.accessor.as_ref(), &state.settings)
        .execute(&route, &request, JsonEmitter)
        .await
}
