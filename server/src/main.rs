use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use common_metrics::MetricsCollector;
use common_types::{ConfigStore, DeadLetterStore};
use envconfig::Envconfig;
use gateway::{AppState, DuplicateDetector, RateLimiter};
use health::HealthRegistry;
use queues::event_queue;
use streams::{DefaultTransportFactory, Supervisor};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use worker::sinks::{HttpSink, PrintSink, RecordSink};
use worker::transform::TransformRegistry;
use worker::{PipelineContext, RequeueHandle, RetryPolicy, WorkSource, WorkerPool};

use crate::config::{Config, SeedFile};

mod config;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    }
    info!("shutdown signal received");
}

fn seed_configs(store: &ConfigStore, path: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read seed file {path}"))?;
    let seed: SeedFile = serde_json::from_str(&raw).context("invalid seed file")?;
    info!(
        endpoints = seed.endpoints.len(),
        streams = seed.streams.len(),
        "seeding configs"
    );
    for endpoint in seed.endpoints {
        store.upsert_endpoint(endpoint);
    }
    for stream in seed.streams {
        store.upsert_stream(stream);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(ConfigStore::new());
    if let Some(path) = &config.seed_file {
        seed_configs(&store, path)?;
    }

    let collector = Arc::new(MetricsCollector::new());
    let dead_letters = Arc::new(DeadLetterStore::new(config.dead_letter_capacity));
    let registry = HealthRegistry::new();
    let limiter = Arc::new(RateLimiter::new(Duration::from_secs(
        config.rate_limit_window_seconds,
    )));
    let dedup = Arc::new(DuplicateDetector::new(Duration::from_secs(
        config.dedup_retention_seconds,
    )));
    let (queue_tx, queue_rx) = event_queue(config.queue_capacity);

    // one sweeper per expiring table
    tokio::spawn(expiring::run_sweeper(
        limiter.table(),
        Duration::from_secs(config.rate_limit_sweep_seconds),
    ));
    tokio::spawn(expiring::run_sweeper(
        dedup.table(),
        Duration::from_secs(config.dedup_sweep_seconds),
    ));

    let sink: Arc<dyn RecordSink> = match &config.sink_url {
        Some(url) => Arc::new(
            HttpSink::new(url.clone(), Duration::from_secs(config.sink_timeout_seconds))
                .context("failed to build sink client")?,
        ),
        None => {
            warn!("no sink url configured, records will be logged");
            Arc::new(PrintSink)
        }
    };

    let context = Arc::new(PipelineContext {
        registry: TransformRegistry::default(),
        sink,
        retry_policy: RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
        ),
        send_timeout: Duration::from_secs(config.sink_timeout_seconds),
        dead_letters: dead_letters.clone(),
        collector: collector.clone(),
    });

    let consumers_shutdown = CancellationToken::new();
    let workers_shutdown = CancellationToken::new();

    let webhook_pool = WorkerPool::new(
        "webhook",
        WorkSource::Queue(queue_rx),
        RequeueHandle::Queue(queue_tx.clone()),
        context.clone(),
        config.webhook_workers,
        registry.register("webhook-pool", Duration::from_secs(30)),
        workers_shutdown.child_token(),
    );
    let webhook_pool = tokio::spawn(webhook_pool.run());

    let supervisor = Supervisor::new(
        store.clone(),
        Arc::new(DefaultTransportFactory),
        context,
        registry.clone(),
        Duration::from_secs(config.supervisor_scan_seconds),
        config.max_stream_restarts,
        consumers_shutdown.clone(),
        workers_shutdown.clone(),
    );
    let supervisor = tokio::spawn(supervisor.run());

    let state = AppState {
        store,
        queue: queue_tx.clone(),
        limiter,
        dedup,
        collector,
        dead_letters,
        liveness: registry,
        worker_count: config.webhook_workers,
    };
    let mut router = gateway::router(state);
    if config.export_prometheus {
        router = common_metrics::setup_metrics_routes(router);
    }

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .with_context(|| format!("could not bind {}", config.address))?;
    info!(address = %config.address, "siphon server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // Ordered shutdown: stop pulling from transports first, give queued work
    // a bounded grace period to drain, then cancel the pools. Whatever is
    // left was not acknowledged and will be redelivered on the next start.
    info!("stopping stream consumers");
    consumers_shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    let drained = tokio::time::timeout(grace, async {
        while queue_tx.depth() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();
    if !drained {
        warn!("grace period elapsed with work still queued; it will be redelivered upstream");
    }

    workers_shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(5), async {
        supervisor.await.ok();
        webhook_pool.await.ok();
    })
    .await
    .is_err()
    {
        warn!("worker tasks did not stop within the deadline");
    }

    info!("shutdown complete");
    Ok(())
}
