use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    /// Already seen within the dedup window; not forwarded downstream.
    Duplicate,
    /// Rejected by the endpoint's event type allow-list; not an error.
    Dropped,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Rejection taxonomy for the webhook endpoint, mapped 1:1 to status codes.
/// Everything except `QueueFull` is deterministic and must not be retried by
/// the caller; `QueueFull` is transient backpressure.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("payload exceeds limit of {0} bytes")]
    PayloadTooLarge(usize),
    #[error("missing or invalid signature")]
    Unauthorized,
    #[error("endpoint is disabled")]
    EndpointDisabled,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("event queue full, retry later")]
    QueueFull,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self {
            IngestError::Malformed(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
            IngestError::EndpointDisabled => StatusCode::FORBIDDEN,
            IngestError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            IngestError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Payload of `GET /webhooks/health`.
#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    pub status: &'static str,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub total_endpoints: usize,
    pub total_processed: u64,
}

impl IntoResponse for GatewayStatus {
    fn into_response(self) -> Response {
        let code = if self.status == "ok" {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, Json(self)).into_response()
    }
}
