//! Startup hooks and the bootstrap sequence: load → before hooks → resolve → accessor → after hooks.

use crate::accessor::DataAccessor;
use crate::config::{load_from_dir, resolve_with, FullConfig, ResolvedModel};
use crate::error::ConfigError;
use crate::settings::Settings;
use crate::state::AppState;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs before definitions are resolved; may add or edit entities and routes.
#[async_trait]
pub trait BeforeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, config: &mut FullConfig, settings: &Settings) -> Result<(), ConfigError>;
}

/// Runs once the state is ready, before the router serves requests (seeding, checks).
#[async_trait]
pub trait AfterHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, state: &AppState) -> Result<(), ConfigError>;
}

/// Hooks run in registration order; the first failure aborts startup.
pub struct Bootstrap {
    settings: Settings,
    before: Vec<Box<dyn BeforeHook>>,
    after: Vec<Box<dyn AfterHook>>,
}

impl Bootstrap {
    pub fn new(settings: Settings) -> Self {
        Bootstrap {
            settings,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn before(mut self, hook: impl BeforeHook + 'static) -> Self {
        self.before.push(Box::new(hook));
        self
    }

    pub fn after(mut self, hook: impl AfterHook + 'static) -> Self {
        self.after.push(Box::new(hook));
        self
    }

    /// Reads definitions from `settings.definitions`, then continues as [`Bootstrap::build`].
    pub async fn load<F>(self, accessor: F) -> Result<AppState, ConfigError>
    where
        F: FnOnce(Arc<ResolvedModel>) -> Result<Arc<dyn DataAccessor>, ConfigError>,
    {
        let config = load_from_dir(&self.settings.definitions).await?;
        self.build(config, accessor).await
    }

    /// `accessor` receives the resolved model so stores that expand relations can keep it.
    pub async fn build<F>(self, mut config: FullConfig, accessor: F) -> Result<AppState, ConfigError>
    where
        F: FnOnce(Arc<ResolvedModel>) -> Result<Arc<dyn DataAccessor>, ConfigError>,
    {
        for hook in &self.before {
            tracing::debug!(hook = hook.name(), "before hook");
            hook.run(&mut config, &self.settings).await?;
        }

        let model = Arc::new(resolve_with(&config, self.settings.strict)?);
        tracing::info!(
            entities = model.entities.len(),
            routes = model.routes.len(),
            "definitions resolved"
        );
        let accessor = accessor(model.clone())?;
        let state = AppState::new(model, accessor, self.settings);

        for hook in &self.after {
            tracing::debug!(hook = hook.name(), "after hook");
            hook.run(&state).await?;
        }
        Ok(state)
    }
}
