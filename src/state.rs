//! Shared application state for all routes. Built once at startup and read-only afterwards.

use crate::accessor::DataAccessor;
use crate::config::ResolvedModel;
use crate::settings::Settings;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ResolvedModel>,
    pub accessor: Arc<dyn DataAccessor>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(model: Arc<ResolvedModel>, accessor: Arc<dyn DataAccessor>, settings: Settings) -> Self {
        AppState {
            model,
            accessor,
            settings: Arc::new(settings),
        }
    }
}
