//! Declared routes built from the resolved model. Routes sharing a path are merged into
//! one method router; each handler captures its own RouteSpec.

use crate::config::{RouteMethod, RouteSpec};
use crate::handlers::entity::execute;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{MethodFilter, MethodRouter},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

fn method_filter(method: RouteMethod) -> MethodFilter {
    match method {
        RouteMethod::Get => MethodFilter::GET,
        RouteMethod::Post => MethodFilter::POST,
        RouteMethod::Put => MethodFilter::PUT,
        RouteMethod::Patch => MethodFilter::PATCH,
        RouteMethod::Delete => MethodFilter::DELETE,
    }
}

pub fn entity_routes(state: AppState) -> Router {
    let mut by_path: Vec<(&str, Vec<&Arc<RouteSpec>>)> = Vec::new();
    for spec in &state.model.routes {
        match by_path.iter_mut().find(|(p, _)| *p == spec.path) {
            Some((_, specs)) => specs.push(spec),
            None => by_path.push((&spec.path, vec![spec])),
        }
    }

    let mut router = Router::new();
    for (path, specs) in by_path {
        let methods = specs.into_iter().fold(MethodRouter::new(), |methods, spec| {
            tracing::info!(route = %spec.label(), action = ?spec.action, "route registered");
            let route = spec.clone();
            let handler = move |State(state): State<AppState>,
                                Path(params): Path<HashMap<String, String>>,
                                Query(query): Query<Vec<(String, String)>>,
                                body: Bytes| {
                let route = route.clone();
                async move { execute(state, route, params, query, body).await }
            };
            methods.on(method_filter(spec.method), handler)
        });
        router = router.route(path, methods);
    }
    router
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(state.settings.body_limit)))
        .with_state(state)
}
