use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_types::{DeadItem, EndpointConfig, StreamConfig};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::router::AppState;

/// Admin CRUD errors, returned as structured `{kind, message, retryable}`
/// bodies. Nothing the admin API rejects is retryable as-is.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Serialize)]
struct AdminErrorBody {
    kind: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AdminError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid"),
        };
        (
            status,
            Json(AdminErrorBody {
                kind,
                message: self.to_string(),
                retryable: false,
            }),
        )
            .into_response()
    }
}

fn validate_endpoint(config: &EndpointConfig) -> Result<(), AdminError> {
    if config.endpoint_id.trim().is_empty() {
        return Err(AdminError::Invalid("endpoint_id is required".to_string()));
    }
    if config.organization_id.trim().is_empty() {
        return Err(AdminError::Invalid(
            "organization_id is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_stream(config: &StreamConfig) -> Result<(), AdminError> {
    if config.stream_id.trim().is_empty() {
        return Err(AdminError::Invalid("stream_id is required".to_string()));
    }
    if config.organization_id.trim().is_empty() {
        return Err(AdminError::Invalid(
            "organization_id is required".to_string(),
        ));
    }
    if config.topics.is_empty() {
        return Err(AdminError::Invalid(
            "at least one topic is required".to_string(),
        ));
    }
    if config.batch_size == 0 || config.buffer_capacity == 0 || config.concurrency == 0 {
        return Err(AdminError::Invalid(
            "batch_size, buffer_capacity and concurrency must be positive".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_endpoints(State(state): State<AppState>) -> Json<Vec<EndpointConfig>> {
    Json(state.store.list_endpoints())
}

pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(config): Json<EndpointConfig>,
) -> Result<impl IntoResponse, AdminError> {
    validate_endpoint(&config)?;
    if state.store.get_endpoint(&config.endpoint_id).is_some() {
        return Err(AdminError::Invalid(format!(
            "endpoint {} already exists",
            config.endpoint_id
        )));
    }
    info!(endpoint_id = %config.endpoint_id, provider = %config.provider, "endpoint created");
    state.store.upsert_endpoint(config.clone());
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EndpointConfig>, AdminError> {
    state
        .store
        .get_endpoint(&id)
        .map(Json)
        .ok_or(AdminError::NotFound("endpoint"))
}

pub async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<EndpointConfig>,
) -> Result<Json<EndpointConfig>, AdminError> {
    validate_endpoint(&config)?;
    if config.endpoint_id != id {
        return Err(AdminError::Invalid(
            "endpoint_id does not match the path".to_string(),
        ));
    }
    if state.store.get_endpoint(&id).is_none() {
        return Err(AdminError::NotFound("endpoint"));
    }
    state.store.upsert_endpoint(config.clone());
    Ok(Json(config))
}

pub async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    state
        .store
        .remove_endpoint(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(AdminError::NotFound("endpoint"))
}

pub async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamConfig>> {
    Json(state.store.list_streams())
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(config): Json<StreamConfig>,
) -> Result<impl IntoResponse, AdminError> {
    validate_stream(&config)?;
    if state.store.get_stream(&config.stream_id).is_some() {
        return Err(AdminError::Invalid(format!(
            "stream {} already exists",
            config.stream_id
        )));
    }
    info!(stream_id = %config.stream_id, "stream created");
    state.store.upsert_stream(config.clone());
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StreamConfig>, AdminError> {
    state
        .store
        .get_stream(&id)
        .map(Json)
        .ok_or(AdminError::NotFound("stream"))
}

pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<StreamConfig>,
) -> Result<Json<StreamConfig>, AdminError> {
    validate_stream(&config)?;
    if config.stream_id != id {
        return Err(AdminError::Invalid(
            "stream_id does not match the path".to_string(),
        ));
    }
    if state.store.get_stream(&id).is_none() {
        return Err(AdminError::NotFound("stream"));
    }
    state.store.upsert_stream(config.clone());
    Ok(Json(config))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AdminError> {
    state
        .store
        .remove_stream(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(AdminError::NotFound("stream"))
}

/// Dead-lettered items with their full error history, newest last.
pub async fn dead_letters(State(state): State<AppState>) -> Json<Vec<DeadItem>> {
    Json(state.dead_letters.snapshot())
}

/// Read-only rolling stats per endpoint/stream plus queue occupancy.
pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "series": state.collector.snapshot(),
        "queue": {
            "depth": state.queue.depth(),
            "capacity": state.queue.max_capacity(),
            "occupancy": state.queue.occupancy(),
        },
        "total_processed": state.collector.total_processed(),
    }))
}
