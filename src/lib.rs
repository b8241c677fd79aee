//! Insac SDK: declarative REST routes over entity definitions. Each request is validated
//! against its route's input schema, handed to a data accessor, and shaped by the route's
//! output template.

pub mod accessor;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod migration;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;
pub mod telemetry;

pub use accessor::DataAccessor;
pub use config::{from_json, load_from_dir, resolve, resolve_with, FullConfig, ResolvedModel};
pub use error::{AccessError, AppError, ConfigError, FieldError};
pub use hooks::{AfterHook, BeforeHook, Bootstrap};
pub use migration::apply_migrations;
pub use query::QueryOptions;
pub use response::{JsonEmitter, Metadata, ResponseEmitter};
pub use routes::{app_router, common_routes, entity_routes};
pub use service::{RequestParts, RouteExecutor};
pub use settings::Settings;
pub use state::AppState;
pub use store::{ensure_database_exists, PgStore};
pub use telemetry::init_tracing;
