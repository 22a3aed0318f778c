use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use common_metrics::MetricsCollector;
use common_types::{ConfigStore, DeadLetterStore, WorkItem};
use health::HealthRegistry;
use queues::QueueTx;
use tower_http::trace::TraceLayer;

use crate::dedup::DuplicateDetector;
use crate::limiter::RateLimiter;
use crate::{admin, endpoint};

/// Shared handler state. Everything in here synchronizes its own interior;
/// the queue is the only structure the gateway shares with the worker side.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub queue: QueueTx<WorkItem>,
    pub limiter: Arc<RateLimiter>,
    pub dedup: Arc<DuplicateDetector>,
    pub collector: Arc<MetricsCollector>,
    pub dead_letters: Arc<DeadLetterStore>,
    pub liveness: HealthRegistry,
    pub worker_count: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/health", get(endpoint::health))
        .route(
            "/webhooks/:provider/:organization_id",
            post(endpoint::webhook),
        )
        .route(
            "/admin/endpoints",
            get(admin::list_endpoints).post(admin::create_endpoint),
        )
        .route(
            "/admin/endpoints/:id",
            get(admin::get_endpoint)
                .put(admin::update_endpoint)
                .delete(admin::delete_endpoint),
        )
        .route(
            "/admin/streams",
            get(admin::list_streams).post(admin::create_stream),
        )
        .route(
            "/admin/streams/:id",
            get(admin::get_stream)
                .put(admin::update_stream)
                .delete(admin::delete_stream),
        )
        .route("/admin/dead_letters", get(admin::dead_letters))
        .route("/admin/stats", get(admin::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
