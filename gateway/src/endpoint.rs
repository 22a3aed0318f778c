use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum_client_ip::InsecureClientIp;
use bytes::Bytes;
use common_types::{EndpointConfig, EventStatus, IngestionEvent, Provider, WorkItem};
use metrics::{counter, gauge};
use queues::QueueError;
use tracing::{instrument, warn, Span};

use crate::api::{GatewayStatus, IngestError, IngestResponse, IngestStatus};
use crate::router::AppState;
use crate::{payload, signature};

/// `POST /webhooks/:provider/:organization_id`.
///
/// Local checks run in rejection-cost order: size, rate limit, parse,
/// signature, dedup. Only then is the event admitted to the queue; a full
/// queue surfaces as backpressure rather than buffering without bound.
#[instrument(skip_all, fields(provider, organization_id))]
pub async fn webhook(
    State(state): State<AppState>,
    ip: InsecureClientIp,
    Path((provider_slug, organization_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    Span::current().record("provider", provider_slug.as_str());
    Span::current().record("organization_id", organization_id.as_str());
    counter!("gateway_requests_total").increment(1);

    let provider = Provider::from_slug(&provider_slug);
    // Unknown (provider, organization) pairs fall back to the
    // unauthenticated generic mode rather than being rejected.
    let config = state
        .store
        .resolve_endpoint(provider, &organization_id)
        .unwrap_or_else(|| EndpointConfig::generic(&organization_id));
    if !config.active {
        return Err(reject(IngestError::EndpointDisabled));
    }

    if body.len() > config.max_payload_bytes {
        return Err(reject(IngestError::PayloadTooLarge(config.max_payload_bytes)));
    }

    let limiter_key = format!("{}:{provider}", config.organization_id);
    if !state
        .limiter
        .acquire(&limiter_key, config.max_requests_per_minute)
    {
        return Err(reject(IngestError::RateLimited));
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let parsed = payload::parse_body(content_type, &body).map_err(reject)?;

    let signature_valid = match &config.secret_key {
        Some(secret) => {
            let provided = headers
                .get(config.signature_header.as_str())
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    warn!(endpoint = %config.endpoint_id, "signature header missing");
                    reject(IngestError::Unauthorized)
                })?;
            if !signature::verify(secret, config.signature_algorithm, &body, provided) {
                // Logged for abuse detection.
                warn!(endpoint = %config.endpoint_id, source_ip = %ip.0, "signature mismatch");
                return Err(reject(IngestError::Unauthorized));
            }
            true
        }
        None => false,
    };

    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();

    let event_type = payload::extract_event_type(&header_map, &parsed);
    if !config.accepts_event_type(&event_type) {
        counter!("gateway_dropped_events_total", "reason" => "event_type").increment(1);
        return Ok(IngestResponse {
            status: IngestStatus::Dropped,
        });
    }

    let hash = payload::content_hash(provider, &config.organization_id, &parsed);
    if state.dedup.is_duplicate_and_record(&hash) {
        // A redelivery is acknowledged, not an error; it is just not
        // forwarded a second time.
        return Ok(IngestResponse {
            status: IngestStatus::Duplicate,
        });
    }

    let mut event = IngestionEvent::new(
        provider,
        &config.organization_id,
        &event_type,
        parsed,
        header_map,
        signature_valid,
        Some(ip.0.to_string()),
    );
    event
        .transition(EventStatus::Queued)
        .expect("Received -> Queued is always legal");

    match state.queue.try_send(WorkItem::Webhook(Box::new(event))) {
        Ok(()) => {
            gauge!("gateway_queue_depth").set(state.queue.depth() as f64);
            counter!("gateway_events_accepted_total").increment(1);
            Ok(IngestResponse {
                status: IngestStatus::Accepted,
            })
        }
        Err(QueueError::Full) | Err(QueueError::Closed) => Err(reject(IngestError::QueueFull)),
    }
}

fn reject(error: IngestError) -> IngestError {
    counter!("gateway_rejected_total", "reason" => reason(&error)).increment(1);
    error
}

fn reason(error: &IngestError) -> &'static str {
    match error {
        IngestError::Malformed(_) => "malformed",
        IngestError::PayloadTooLarge(_) => "payload_too_large",
        IngestError::Unauthorized => "unauthorized",
        IngestError::EndpointDisabled => "endpoint_disabled",
        IngestError::RateLimited => "rate_limited",
        IngestError::QueueFull => "queue_full",
    }
}

/// `GET /webhooks/health`.
pub async fn health(State(state): State<AppState>) -> GatewayStatus {
    let healthy = state.liveness.status().healthy;
    GatewayStatus {
        status: if healthy { "ok" } else { "unhealthy" },
        queue_depth: state.queue.depth(),
        active_workers: state.worker_count,
        total_endpoints: state.store.endpoint_count(),
        total_processed: state.collector.total_processed(),
    }
}
