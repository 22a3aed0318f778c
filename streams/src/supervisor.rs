use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_types::{ConfigStore, StreamConfig, WorkItem};
use health::{HealthHandle, HealthRegistry};
use metrics::{counter, gauge};
use queues::StreamBuffer;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use worker::{PipelineContext, RequeueHandle, WorkSource, WorkerPool};

use crate::consumer::{ConsumerState, StreamConsumer};
use crate::transport::TransportFactory;

/// Consecutive failures at which restart alerts escalate from warning to
/// critical.
const CRITICAL_AFTER: u32 = 3;

/// Watches every active stream on a fixed interval: starts streams added to
/// the config store, stops removed or deactivated ones, and restarts
/// consumers that left `Running`, with exponential backoff and jitter. A
/// stream that keeps failing past its restart budget is left stopped until
/// an admin touches its config again.
pub struct Supervisor {
    store: Arc<ConfigStore>,
    factory: Arc<dyn TransportFactory>,
    context: Arc<PipelineContext>,
    registry: HealthRegistry,
    liveness: HealthHandle,
    scan_interval: Duration,
    max_restarts: u32,
    consumers_shutdown: CancellationToken,
    workers_shutdown: CancellationToken,
    streams: HashMap<String, ManagedStream>,
}

struct ManagedStream {
    config: Arc<StreamConfig>,
    buffer: Arc<StreamBuffer<WorkItem>>,
    state: watch::Receiver<ConsumerState>,
    consumer: JoinHandle<()>,
    consumer_shutdown: CancellationToken,
    pool: JoinHandle<()>,
    consecutive_failures: u32,
    abandoned: bool,
}

fn pool_component(stream_id: &str) -> String {
    format!("stream-pool:{stream_id}")
}

fn restart_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(6);
    let capped = std::cmp::min(
        Duration::from_secs(1) * 2u32.pow(exp),
        Duration::from_secs(60),
    );
    capped + Duration::from_millis(rand::thread_rng().gen_range(0..500))
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConfigStore>,
        factory: Arc<dyn TransportFactory>,
        context: Arc<PipelineContext>,
        registry: HealthRegistry,
        scan_interval: Duration,
        max_restarts: u32,
        consumers_shutdown: CancellationToken,
        workers_shutdown: CancellationToken,
    ) -> Supervisor {
        let liveness = registry.register("stream-supervisor", scan_interval * 3);
        Supervisor {
            store,
            factory,
            context,
            registry,
            liveness,
            scan_interval,
            max_restarts,
            consumers_shutdown,
            workers_shutdown,
            streams: HashMap::new(),
        }
    }

    /// Scan until the consumer-side shutdown fires, then stop every stream:
    /// consumers first, buffers closed, pools drained.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.consumers_shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.liveness.report_healthy();
            self.reconcile().await;
            self.restart_failed();
            gauge!("supervised_streams").set(self.streams.len() as f64);
        }
        self.stop_all().await;
    }

    /// Align managed streams with the config store. A changed config tears
    /// the stream down and starts it fresh, which also resets the restart
    /// budget; that is how an admin revives an abandoned stream.
    async fn reconcile(&mut self) {
        let configs: HashMap<String, StreamConfig> = self
            .store
            .list_streams()
            .into_iter()
            .map(|config| (config.stream_id.clone(), config))
            .collect();

        let stale: Vec<String> = self
            .streams
            .iter()
            .filter(|(id, managed)| {
                !matches!(configs.get(id.as_str()), Some(config) if config.active && *config == *managed.config)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.stop_stream(&id).await;
        }

        for (id, config) in configs {
            if config.active && !self.streams.contains_key(&id) {
                self.start_stream(config);
            }
        }
    }

    fn start_stream(&mut self, config: StreamConfig) {
        let id = config.stream_id.clone();
        info!(stream = %id, transport = ?config.transport_type, "starting stream");
        let config = Arc::new(config);
        let buffer = Arc::new(StreamBuffer::new(&id, config.buffer_capacity));

        let pool_liveness = self
            .registry
            .register(&pool_component(&id), Duration::from_secs(30));
        let pool = WorkerPool::new(
            &id,
            WorkSource::Buffer(buffer.clone()),
            RequeueHandle::Buffer(buffer.clone()),
            self.context.clone(),
            config.concurrency,
            pool_liveness,
            self.workers_shutdown.child_token(),
        );
        let pool = tokio::spawn(pool.run());

        let consumer_shutdown = self.consumers_shutdown.child_token();
        let (consumer, state) = StreamConsumer::new(
            config.clone(),
            self.factory.clone(),
            buffer.clone(),
            consumer_shutdown.clone(),
        );
        let consumer = tokio::spawn(consumer.run());

        self.streams.insert(
            id,
            ManagedStream {
                config,
                buffer,
                state,
                consumer,
                consumer_shutdown,
                pool,
                consecutive_failures: 0,
                abandoned: false,
            },
        );
    }

    fn restart_failed(&mut self) {
        for (id, managed) in self.streams.iter_mut() {
            if managed.abandoned {
                continue;
            }
            let state = *managed.state.borrow();
            if state == ConsumerState::Running {
                if managed.consecutive_failures > 0 {
                    info!(stream = %id, "stream recovered");
                    managed.consecutive_failures = 0;
                }
                continue;
            }
            // Starting, stopping or waiting out a restart backoff.
            if !managed.consumer.is_finished() {
                continue;
            }

            managed.consecutive_failures += 1;
            let failures = managed.consecutive_failures;
            counter!("stream_restarts_total", "stream" => id.clone()).increment(1);
            if failures > self.max_restarts {
                managed.abandoned = true;
                counter!("stream_alerts_total", "stream" => id.clone(), "severity" => "critical")
                    .increment(1);
                error!(
                    stream = %id,
                    failures,
                    "restart budget exhausted, stream left stopped pending manual action"
                );
                continue;
            }
            if failures >= CRITICAL_AFTER {
                counter!("stream_alerts_total", "stream" => id.clone(), "severity" => "critical")
                    .increment(1);
                error!(stream = %id, failures, "stream consumer keeps failing, restarting with backoff");
            } else {
                counter!("stream_alerts_total", "stream" => id.clone(), "severity" => "warning")
                    .increment(1);
                warn!(stream = %id, failures, "stream consumer not running, restarting");
            }

            let delay = restart_backoff(failures);
            let (consumer, state) = StreamConsumer::new(
                managed.config.clone(),
                self.factory.clone(),
                managed.buffer.clone(),
                managed.consumer_shutdown.clone(),
            );
            managed.state = state;
            managed.consumer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                consumer.run().await;
            });
        }
    }

    async fn stop_stream(&mut self, id: &str) {
        let Some(managed) = self.streams.remove(id) else {
            return;
        };
        info!(stream = %id, "stopping stream");
        managed.consumer_shutdown.cancel();
        if managed.consumer.await.is_err() {
            warn!(stream = %id, "consumer task panicked while stopping");
        }
        // Close the buffer so the pool drains what was admitted, then stops.
        managed.buffer.close();
        if managed.pool.await.is_err() {
            warn!(stream = %id, "pool task panicked while stopping");
        }
        self.registry.deregister(&pool_component(id));
    }

    async fn stop_all(&mut self) {
        let ids: Vec<String> = self.streams.keys().cloned().collect();
        for id in ids {
            self.stop_stream(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_metrics::MetricsCollector;
    use common_types::DeadLetterStore;
    use serde_json::json;
    use worker::sinks::MemorySink;
    use worker::transform::TransformRegistry;
    use worker::RetryPolicy;

    use crate::mock::MockTransportFactory;

    fn pipeline(sink: Arc<MemorySink>) -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            registry: TransformRegistry::default(),
            sink,
            retry_policy: RetryPolicy::default(),
            send_timeout: Duration::from_secs(5),
            dead_letters: Arc::new(DeadLetterStore::new(100)),
            collector: Arc::new(MetricsCollector::new()),
        })
    }

    fn stream_config(stream_id: &str) -> StreamConfig {
        serde_json::from_value(json!({
            "stream_id": stream_id,
            "organization_id": "acme",
            "transport_type": "broker_queue",
            "connection": "localhost:9092",
            "topics": ["orders"],
            "batch_timeout_ms": 50,
            "concurrency": 2
        }))
        .unwrap()
    }

    struct Harness {
        factory: MockTransportFactory,
        sink: Arc<MemorySink>,
        registry: HealthRegistry,
        consumers: CancellationToken,
        workers: CancellationToken,
        handle: JoinHandle<()>,
    }

    fn start(store: Arc<ConfigStore>, factory: MockTransportFactory, max_restarts: u32) -> Harness {
        let sink = Arc::new(MemorySink::new());
        let registry = HealthRegistry::new();
        let consumers = CancellationToken::new();
        let workers = CancellationToken::new();
        let supervisor = Supervisor::new(
            store,
            Arc::new(factory.clone()),
            pipeline(sink.clone()),
            registry.clone(),
            Duration::from_secs(1),
            max_restarts,
            consumers.clone(),
            workers.clone(),
        );
        let handle = tokio::spawn(supervisor.run());
        Harness {
            factory,
            sink,
            registry,
            consumers,
            workers,
            handle,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never became true");
    }

    async fn shut_down(harness: Harness) {
        harness.consumers.cancel();
        harness.workers.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn active_streams_are_started_and_deliver_downstream() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_stream(stream_config("orders"));
        let factory = MockTransportFactory::new();
        factory.push_batch(vec![
            MockTransportFactory::item("orders", 1, r#"{"amount": 1}"#),
            MockTransportFactory::item("orders", 2, r#"{"amount": 2}"#),
        ]);

        let harness = start(store, factory, 5);
        wait_until(|| harness.sink.len() == 2).await;
        assert_eq!(harness.factory.acked().len(), 2);
        assert!(harness
            .registry
            .status()
            .components
            .contains_key("stream-pool:orders"));

        shut_down(harness).await;
    }

    #[tokio::test(start_paused = true)]
    async fn errored_consumer_is_restarted_without_reprocessing() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_stream(stream_config("orders"));
        let factory = MockTransportFactory::new();
        factory.push_batch(vec![MockTransportFactory::item(
            "orders",
            1,
            r#"{"n": 1}"#,
        )]);
        factory.push_error("connection reset");
        factory.push_batch(vec![MockTransportFactory::item(
            "orders",
            2,
            r#"{"n": 2}"#,
        )]);

        let harness = start(store, factory, 5);
        wait_until(|| harness.sink.len() == 2).await;

        // the consumer reconnected exactly once and nothing was redelivered
        assert_eq!(harness.factory.connects(), 2);
        assert_eq!(harness.factory.acked(), vec!["orders-1", "orders-2"]);

        shut_down(harness).await;
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_abandons_the_stream() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_stream(stream_config("orders"));
        let factory = MockTransportFactory::new();
        factory.fail_connects(u32::MAX);

        let harness = start(store, factory, 2);
        // initial attempt plus two restarts, then no further connects
        wait_until(|| harness.factory.connects() == 3).await;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(harness.factory.connects(), 3);

        shut_down(harness).await;
    }

    #[tokio::test(start_paused = true)]
    async fn config_update_revives_an_abandoned_stream() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_stream(stream_config("orders"));
        let factory = MockTransportFactory::new();
        factory.fail_connects(3);

        let harness = start(store.clone(), factory, 2);
        wait_until(|| harness.factory.connects() == 3).await;

        // admin touches the config; the stream is rebuilt with a fresh
        // restart budget and this time the transport connects
        let mut config = stream_config("orders");
        config.batch_size = 50;
        store.upsert_stream(config);
        harness
            .factory
            .push_batch(vec![MockTransportFactory::item(
                "orders",
                1,
                r#"{"n": 1}"#,
            )]);
        wait_until(|| harness.sink.len() == 1).await;

        shut_down(harness).await;
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_streams_are_stopped_and_deregistered() {
        let store = Arc::new(ConfigStore::new());
        store.upsert_stream(stream_config("orders"));
        let factory = MockTransportFactory::new();

        let harness = start(store.clone(), factory, 5);
        wait_until(|| {
            harness
                .registry
                .status()
                .components
                .contains_key("stream-pool:orders")
        })
        .await;

        let mut config = stream_config("orders");
        config.active = false;
        store.upsert_stream(config);
        wait_until(|| {
            !harness
                .registry
                .status()
                .components
                .contains_key("stream-pool:orders")
        })
        .await;

        shut_down(harness).await;
    }
}
