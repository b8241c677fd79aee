//! Demo server: loads the definitions directory, connects to PostgreSQL and serves the routes.
//!
//! Run from repo root: `cargo run -p demo-server` (add `-- --setup` to recreate the tables).

use async_trait::async_trait;
use insac_sdk::{
    app_router, apply_migrations, ensure_database_exists, init_tracing, AfterHook, AppState, Bootstrap, ConfigError,
    DataAccessor, PgStore, Settings,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Creates the tables once the model is resolved; `force` drops them first.
struct Migrate {
    pool: PgPool,
    force: bool,
}

#[async_trait]
impl AfterHook for Migrate {
    fn name(&self) -> &str {
        "migrate"
    }

    async fn run(&self, state: &AppState) -> Result<(), ConfigError> {
        apply_migrations(&self.pool, &state.model, self.force)
            .await
            .map_err(|e| ConfigError::Load(format!("migrations: {}", e)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_tracing("insac_sdk=info,demo_server=info");

    let setup = std::env::args().any(|a| a == "--setup");
    let database_url = settings
        .database_url
        .clone()
        .unwrap_or_else(|| "postgres://localhost/insac".into());
    ensure_database_exists(&database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let bind = settings.bind;
    let store_pool = pool.clone();
    let state = Bootstrap::new(settings)
        .after(Migrate { pool, force: setup })
        .load(move |model| {
            let store: Arc<dyn DataAccessor> = Arc::new(PgStore::new(store_pool, model));
            Ok(store)
        })
        .await?;

    let app = app_router(state);
    let listener = TcpListener::bind(bind).await?;
    tracing::info!("Demo server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
