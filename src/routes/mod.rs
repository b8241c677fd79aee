//! Router assembly: common routes plus every declared route.

mod common;
mod entity;

pub use common::common_routes;
pub use entity::entity_routes;

use crate::state::AppState;
use axum::Router;

/// Full application router.
pub fn app_router(state: AppState) -> Router {
    common_routes(state.clone()).merge(entity_routes(state))
}
