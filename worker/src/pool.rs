use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common_metrics::MetricsCollector;
use common_types::{DeadItem, DeadLetterStore, EventStatus, WorkItem};
use health::HealthHandle;
use metrics::{counter, gauge};
use queues::{QueueRx, QueueTx, StreamBuffer};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::filters;
use crate::retry::RetryPolicy;
use crate::sinks::{RecordSink, SinkError};
use crate::transform::{self, TransformRegistry};

/// Everything the delivery pipeline shares across pools: the transform
/// registry, the downstream sink, retry parameters and the terminal
/// bookkeeping stores. Built once at startup and passed by reference.
pub struct PipelineContext {
    pub registry: TransformRegistry,
    pub sink: Arc<dyn RecordSink>,
    pub retry_policy: RetryPolicy,
    pub send_timeout: Duration,
    pub dead_letters: Arc<DeadLetterStore>,
    pub collector: Arc<MetricsCollector>,
}

/// Where a pool drains its work from: the gateway's event queue or a
/// stream's buffer.
pub enum WorkSource {
    Queue(QueueRx<WorkItem>),
    Buffer(Arc<StreamBuffer<WorkItem>>),
}

impl WorkSource {
    async fn next(&mut self) -> Option<WorkItem> {
        match self {
            WorkSource::Queue(rx) => rx.recv().await,
            WorkSource::Buffer(buffer) => buffer.recv().await,
        }
    }
}

/// Re-admits a retry-delayed item. A retried item awaits queue capacity
/// rather than being dropped; buffer requeues bypass the capacity check.
#[derive(Clone)]
pub enum RequeueHandle {
    Queue(QueueTx<WorkItem>),
    Buffer(Arc<StreamBuffer<WorkItem>>),
}

impl RequeueHandle {
    pub async fn requeue(&self, item: WorkItem) -> bool {
        match self {
            RequeueHandle::Queue(tx) => tx.send(item).await.is_ok(),
            RequeueHandle::Buffer(buffer) => {
                buffer.requeue(item);
                true
            }
        }
    }
}

/// A fixed-concurrency pool draining one source: dequeue, filter, transform,
/// send downstream, then retry or dead-letter on failure. One pool serves the
/// webhook queue and one serves each stream buffer, so a failing stream never
/// starves the others.
pub struct WorkerPool {
    name: String,
    source: WorkSource,
    requeue: RequeueHandle,
    context: Arc<PipelineContext>,
    concurrency: usize,
    liveness: HealthHandle,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        name: &str,
        source: WorkSource,
        requeue: RequeueHandle,
        context: Arc<PipelineContext>,
        concurrency: usize,
        liveness: HealthHandle,
        shutdown: CancellationToken,
    ) -> WorkerPool {
        WorkerPool {
            name: name.to_string(),
            source,
            requeue,
            context,
            concurrency: concurrency.max(1),
            liveness,
            shutdown,
        }
    }

    /// Run until the shutdown token fires or the source closes, then wait for
    /// in-flight items to finish. Items admitted but not yet processed when
    /// this returns are redelivered by upstream on restart.
    pub async fn run(mut self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut heartbeat = tokio::time::interval(Duration::from_secs(5));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        'outer: loop {
            gauge!("worker_pool_saturation", "pool" => self.name.clone()).set(
                1f64 - semaphore.available_permits() as f64 / self.concurrency as f64,
            );
            // Take the permit first so a full pool stops dequeueing instead
            // of holding an unprocessed item.
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");

            let item = loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break 'outer,
                    _ = heartbeat.tick() => self.liveness.report_healthy(),
                    item = self.source.next() => match item {
                        Some(item) => break item,
                        None => break 'outer,
                    },
                }
            };
            self.liveness.report_healthy();

            let context = self.context.clone();
            let requeue = self.requeue.clone();
            let pool = self.name.clone();
            tokio::spawn(async move {
                let _permit = permit;
                process(item, &pool, context, requeue).await;
            });
        }

        // Drain in-flight work before reporting the pool stopped.
        semaphore
            .acquire_many(self.concurrency as u32)
            .await
            .expect("worker semaphore closed");
        debug!(pool = %self.name, "worker pool drained");
    }
}

async fn process(
    mut item: WorkItem,
    pool: &str,
    context: Arc<PipelineContext>,
    requeue: RequeueHandle,
) {
    let series = item.series_key();
    if let Err(err) = item.transition(EventStatus::Processing) {
        error!(id = %item.id(), %err, "dropping item in unexpected state");
        return;
    }

    if let WorkItem::Stream { message, config } = &item {
        if !filters::passes(&config.filters, &message.payload) {
            counter!("worker_items_filtered_total", "source" => series).increment(1);
            return;
        }
    }

    let record = transform::transform(&context.registry, &item);
    let result = match tokio::time::timeout(context.send_timeout, context.sink.send(&record)).await
    {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout),
    };
    let latency_ms = (Utc::now() - item.received_at()).num_milliseconds().max(0) as u64;

    match result {
        Ok(()) => {
            item.set_processing_latency(latency_ms);
            if let Err(err) = item.transition(EventStatus::Processed) {
                error!(id = %item.id(), %err, "could not finalize item");
                return;
            }
            context.collector.record_success(&series, latency_ms as f64);
            counter!("worker_items_processed_total", "pool" => pool.to_string()).increment(1);
            debug!(id = %item.id(), retries = item.retry_count(), "delivered");
        }
        Err(sink_err) => {
            context.collector.record_failure(&series, latency_ms as f64);
            on_failure(item, sink_err, pool, context, requeue).await;
        }
    }
}

/// Failure path: record the error, then either schedule a deferred retry or
/// dead-letter the item. The item is owned by the retry task while delayed,
/// so no worker can pick it up twice.
async fn on_failure(
    mut item: WorkItem,
    sink_err: SinkError,
    pool: &str,
    context: Arc<PipelineContext>,
    requeue: RequeueHandle,
) {
    item.record_error(sink_err.to_string());
    if let Err(err) = item.transition(EventStatus::Failed) {
        error!(id = %item.id(), %err, "could not fail item");
        return;
    }

    let retry_count = item.retry_count();
    if retry_count < context.retry_policy.max_retries {
        let delay = context.retry_policy.delay(retry_count);
        item.bump_retry_count();
        if let Err(err) = item.transition(EventStatus::Queued) {
            error!(id = %item.id(), %err, "could not requeue item");
            return;
        }
        counter!("worker_items_retried_total", "pool" => pool.to_string()).increment(1);
        debug!(id = %item.id(), attempt = retry_count + 1, ?delay, %sink_err, "scheduling retry");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !requeue.requeue(item).await {
                warn!("queue closed, retry dropped");
            }
        });
    } else {
        if let Err(err) = item.transition(EventStatus::Dead) {
            error!(id = %item.id(), %err, "could not dead-letter item");
            return;
        }
        context.dead_letters.push(DeadItem::from_work_item(&item));
        counter!("worker_items_dead_total", "pool" => pool.to_string()).increment(1);
        error!(
            id = %item.id(),
            retries = retry_count,
            last_error = %sink_err,
            "retries exhausted, item dead-lettered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_types::{IngestionEvent, Provider, StreamConfig, StreamMessage};
    use health::HealthRegistry;
    use queues::event_queue;
    use serde_json::json;
    use std::collections::HashMap;

    use crate::sinks::MemorySink;

    fn context(sink: Arc<MemorySink>) -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            registry: TransformRegistry::default(),
            sink,
            retry_policy: RetryPolicy::default(),
            send_timeout: Duration::from_secs(5),
            dead_letters: Arc::new(DeadLetterStore::new(100)),
            collector: Arc::new(MetricsCollector::new()),
        })
    }

    fn queued_event() -> WorkItem {
        let mut event = IngestionEvent::new(
            Provider::Stripe,
            "acme",
            "invoice.paid",
            json!({"type": "invoice.paid", "data": {"object": {"id": "in_1"}}}),
            HashMap::new(),
            true,
            None,
        );
        event.transition(EventStatus::Queued).unwrap();
        WorkItem::Webhook(Box::new(event))
    }

    fn stream_config(filters: Vec<common_types::FilterRule>) -> Arc<StreamConfig> {
        let mut config: StreamConfig = serde_json::from_value(json!({
            "stream_id": "orders",
            "organization_id": "acme",
            "transport_type": "socket",
            "connection": "127.0.0.1:9000",
            "topics": ["orders"]
        }))
        .unwrap();
        config.filters = filters;
        Arc::new(config)
    }

    fn queued_stream_item(payload: serde_json::Value, config: Arc<StreamConfig>) -> WorkItem {
        let mut message = StreamMessage::new("orders", "acme", payload, "orders", 0, 1);
        message.transition(EventStatus::Queued).unwrap();
        WorkItem::Stream {
            message: Box::new(message),
            config,
        }
    }

    fn pool_on_queue(
        context: Arc<PipelineContext>,
        capacity: usize,
    ) -> (queues::QueueTx<WorkItem>, WorkerPool, CancellationToken) {
        let (tx, rx) = event_queue(capacity);
        let registry = HealthRegistry::new();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(
            "test",
            WorkSource::Queue(rx),
            RequeueHandle::Queue(tx.clone()),
            context,
            2,
            registry.register("test-pool", Duration::from_secs(60)),
            shutdown.clone(),
        );
        (tx, pool, shutdown)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_queued_events_to_the_sink() {
        let sink = Arc::new(MemorySink::new());
        let context = context(sink.clone());
        let (tx, pool, shutdown) = pool_on_queue(context.clone(), 8);
        let handle = tokio::spawn(pool.run());

        tx.try_send(queued_event()).unwrap();
        wait_until(|| sink.len() == 1).await;

        let records = sink.records();
        assert_eq!(records[0].event_type, "invoice.paid");
        assert_eq!(context.collector.total_processed(), 1);
        assert!(context.dead_letters.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(2);
        let context = context(sink.clone());
        let (tx, pool, shutdown) = pool_on_queue(context.clone(), 8);
        let handle = tokio::spawn(pool.run());

        tx.try_send(queued_event()).unwrap();
        // two failed attempts, then delivery on the third
        wait_until(|| sink.len() == 1).await;

        assert!(context.dead_letters.is_empty());
        let snapshot = context.collector.snapshot();
        assert_eq!(snapshot[0].last_minute.errors, 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_dead_letter_with_full_history() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next(u32::MAX);
        let context = context(sink.clone());
        let (tx, pool, shutdown) = pool_on_queue(context.clone(), 8);
        let handle = tokio::spawn(pool.run());

        tx.try_send(queued_event()).unwrap();
        wait_until(|| context.dead_letters.len() == 1).await;

        let dead = context.dead_letters.snapshot();
        // initial attempt plus max_retries retries, all recorded
        assert_eq!(dead[0].retry_count, 3);
        assert_eq!(dead[0].errors.len(), 4);
        assert_eq!(dead[0].errors[0].attempt, 0);
        assert_eq!(dead[0].errors[3].attempt, 3);
        assert!(sink.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_stream_messages_are_dropped_not_failed() {
        let sink = Arc::new(MemorySink::new());
        let context = context(sink.clone());
        let buffer = Arc::new(StreamBuffer::new("orders", 8));
        let registry = HealthRegistry::new();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(
            "orders",
            WorkSource::Buffer(buffer.clone()),
            RequeueHandle::Buffer(buffer.clone()),
            context.clone(),
            2,
            registry.register("orders-pool", Duration::from_secs(60)),
            shutdown.clone(),
        );
        let handle = tokio::spawn(pool.run());

        let config = stream_config(vec![common_types::FilterRule {
            field: "amount".to_string(),
            op: common_types::FilterOp::Gt,
            value: json!(100),
        }]);
        buffer.push(queued_stream_item(json!({"amount": 5}), config.clone()));
        buffer.push(queued_stream_item(json!({"amount": 500}), config));

        wait_until(|| sink.len() == 1).await;
        assert_eq!(sink.records()[0].properties["amount"], json!(500));
        assert!(context.dead_letters.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_source_drains_and_stops() {
        let sink = Arc::new(MemorySink::new());
        let context = context(sink.clone());
        // Requeue on a side buffer so dropping the sender closes the source.
        let (tx, rx) = event_queue(8);
        let registry = HealthRegistry::new();
        let pool = WorkerPool::new(
            "test",
            WorkSource::Queue(rx),
            RequeueHandle::Buffer(Arc::new(StreamBuffer::new("unused", 8))),
            context,
            2,
            registry.register("test-pool", Duration::from_secs(60)),
            CancellationToken::new(),
        );
        let handle = tokio::spawn(pool.run());

        tx.try_send(queued_event()).unwrap();
        wait_until(|| sink.len() == 1).await;

        drop(tx);
        handle.await.unwrap();
    }
}
