//! Route execution: resolve input, call the accessor, shape output, emit once.

use crate::accessor::DataAccessor;
use crate::config::{EntitySchema, ResolvedModel, RouteAction, RouteSpec};
use crate::error::AppError;
use crate::response::{Metadata, ResponseEmitter};
use crate::service::input::{InputResolver, RequestParts, ResolvedInput};
use crate::service::output::OutputShaper;
use crate::settings::Settings;
use axum::http::StatusCode;
use serde_json::Value;

/// Successful result before emission.
#[derive(Debug, PartialEq)]
pub struct Outcome {
    pub status: StatusCode,
    pub data: Option<Value>,
    pub metadata: Option<Metadata>,
}

pub struct RouteExecutor<'a> {
    model: &'a ResolvedModel,
    accessor: &'a dyn DataAccessor,
    settings: &'a Settings,
}

impl<'a> RouteExecutor<'a> {
    pub fn new(model: &'a ResolvedModel, accessor: &'a dyn DataAccessor, settings: &'a Settings) -> Self {
        RouteExecutor {
            model,
            accessor,
            settings,
        }
    }

    /// Runs the route and hands the single resulting response to `emitter`.
    pub async fn execute<E: ResponseEmitter>(&self, route: &RouteSpec, request: &RequestParts, emitter: E) -> E::Output {
        match self.run(route, request).await {
            Ok(outcome) => emitter.emit_success(outcome.status, outcome.data, outcome.metadata),
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(route = %route.label(), error = %err, "request failed");
                } else {
                    tracing::warn!(route = %route.label(), status = status.as_u16(), error = %err, "request rejected");
                }
                emitter.emit_error(status, err.to_body(self.settings.production))
            }
        }
    }

    pub async fn run(&self, route: &RouteSpec, request: &RequestParts) -> Result<Outcome, AppError> {
        let entity = self
            .model
            .entity(&route.entity)
            .ok_or_else(|| AppError::Internal(format!("route {} names unknown entity '{}'", route.label(), route.entity)))?;

        let input = InputResolver::new(self.settings)
            .resolve(route, entity, request)
            .map_err(AppError::Validation)?;

        let (raw, total, status) = self.invoke(route, entity, request, &input).await?;

        let Some(template) = &route.output else {
            return Ok(Outcome {
                status,
                data: None,
                metadata: None,
            });
        };
        let data = raw.map(|r| OutputShaper::shape(&r, template));
        let metadata = match (template.metadata, total, &input.options.pagination) {
            (true, Some(total), Some(pagination)) => {
                let returned = data.as_ref().and_then(Value::as_array).map(|a| a.len() as u64).unwrap_or(0);
                Some(Metadata::new(returned, total, pagination))
            }
            _ => None,
        };
        Ok(Outcome { status, data, metadata })
    }

    async fn invoke(
        &self,
        route: &RouteSpec,
        entity: &EntitySchema,
        request: &RequestParts,
        input: &ResolvedInput,
    ) -> Result<(Option<Value>, Option<u64>, StatusCode), AppError> {
        let access = |e| AppError::from_access(&entity.name, e);
        let wants_row = route.output.is_some();
        let options = &input.options;
        match route.action {
            RouteAction::List => {
                let (rows, total) = self.accessor.find_many(entity, options).await.map_err(access)?;
                Ok((Some(Value::Array(rows)), Some(total), StatusCode::OK))
            }
            RouteAction::Get => match self.accessor.find_one(entity, options).await.map_err(access)? {
                Some(row) => Ok((Some(row), None, StatusCode::OK)),
                None => Err(not_found(route, entity, request)),
            },
            RouteAction::Create => {
                let row = self.accessor.create(entity, &input.body).await.map_err(access)?;
                let nested = input.body.values().any(Value::is_object);
                let key = row.get(&entity.primary_key).cloned();
                let row = match key {
                    // related rows written with it are read back through the template's includes
                    Some(key) if nested && !options.includes.is_empty() => {
                        let by_key = options.clone().eq(&entity.primary_key, key);
                        self.accessor.find_one(entity, &by_key).await.map_err(access)?.unwrap_or(row)
                    }
                    _ => row,
                };
                Ok((Some(row), None, StatusCode::CREATED))
            }
            RouteAction::Update | RouteAction::Restore => {
                let affected = if route.action == RouteAction::Update {
                    self.accessor.update(entity, &input.body, options).await.map_err(access)?
                } else {
                    self.accessor.restore(entity, options).await.map_err(access)?
                };
                if affected == 0 {
                    return Err(not_found(route, entity, request));
                }
                let row = if wants_row {
                    self.accessor.find_one(entity, options).await.map_err(access)?
                } else {
                    None
                };
                Ok((row, None, StatusCode::OK))
            }
            RouteAction::Delete => {
                let before = if wants_row {
                    self.accessor.find_one(entity, options).await.map_err(access)?
                } else {
                    None
                };
                if self.accessor.destroy(entity, options).await.map_err(access)? == 0 {
                    return Err(not_found(route, entity, request));
                }
                Ok((before, None, StatusCode::OK))
            }
        }
    }
}

/// Names the entity, the lookup field, and the value the client sent.
fn not_found(route: &RouteSpec, entity: &EntitySchema, request: &RequestParts) -> AppError {
    let (field, value) = route
        .input
        .params
        .first()
        .map(|p| (p.field.name.clone(), request.params.get(&p.name).cloned().unwrap_or_default()))
        .unwrap_or_else(|| (entity.primary_key.clone(), String::new()));
    AppError::NotFound {
        entity: entity.name.clone(),
        field,
        value,
    }
}
