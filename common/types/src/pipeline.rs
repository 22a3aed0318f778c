use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::event::{ErrorEntry, IngestionEvent};
use crate::message::StreamMessage;
use crate::status::{EventStatus, InvalidTransition};

/// Unit of work drained by a worker pool. Stream items carry their config so
/// filters and field mappings survive config edits made after admission.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Webhook(Box<IngestionEvent>),
    Stream {
        message: Box<StreamMessage>,
        config: Arc<StreamConfig>,
    },
}

impl WorkItem {
    pub fn id(&self) -> Uuid {
        match self {
            WorkItem::Webhook(event) => event.id,
            WorkItem::Stream { message, .. } => message.id,
        }
    }

    pub fn organization_id(&self) -> &str {
        match self {
            WorkItem::Webhook(event) => &event.organization_id,
            WorkItem::Stream { message, .. } => &message.organization_id,
        }
    }

    /// Metrics series key: one per endpoint or stream.
    pub fn series_key(&self) -> String {
        match self {
            WorkItem::Webhook(event) => {
                format!("webhook:{}:{}", event.provider, event.organization_id)
            }
            WorkItem::Stream { message, .. } => format!("stream:{}", message.stream_id),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            WorkItem::Webhook(event) => &event.event_type,
            WorkItem::Stream { .. } => "stream_message",
        }
    }

    pub fn payload(&self) -> &serde_json::Value {
        match self {
            WorkItem::Webhook(event) => &event.payload,
            WorkItem::Stream { message, .. } => &message.payload,
        }
    }

    pub fn status(&self) -> EventStatus {
        match self {
            WorkItem::Webhook(event) => event.status,
            WorkItem::Stream { message, .. } => message.status,
        }
    }

    pub fn transition(&mut self, to: EventStatus) -> Result<(), InvalidTransition> {
        match self {
            WorkItem::Webhook(event) => event.transition(to),
            WorkItem::Stream { message, .. } => message.transition(to),
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            WorkItem::Webhook(event) => event.retry_count,
            WorkItem::Stream { message, .. } => message.retry_count,
        }
    }

    pub fn bump_retry_count(&mut self) {
        match self {
            WorkItem::Webhook(event) => event.retry_count += 1,
            WorkItem::Stream { message, .. } => message.retry_count += 1,
        }
    }

    pub fn record_error(&mut self, message: String) {
        match self {
            WorkItem::Webhook(event) => event.record_error(message),
            WorkItem::Stream { message: m, .. } => m.record_error(message),
        }
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        match self {
            WorkItem::Webhook(event) => &event.errors,
            WorkItem::Stream { message, .. } => &message.errors,
        }
    }

    /// Ingress time: when the gateway accepted the event, or the stream
    /// message timestamp.
    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            WorkItem::Webhook(event) => event.received_at,
            WorkItem::Stream { message, .. } => message.timestamp,
        }
    }

    pub fn set_processing_latency(&mut self, latency_ms: u64) {
        if let WorkItem::Stream { message, .. } = self {
            message.processing_latency_ms = Some(latency_ms);
        }
    }
}

/// A dead-lettered item, kept for inspection after its retry budget ran out.
#[derive(Debug, Clone, Serialize)]
pub struct DeadItem {
    pub id: Uuid,
    pub organization_id: String,
    pub source: String,
    pub event_type: String,
    pub retry_count: u32,
    pub errors: Vec<ErrorEntry>,
    pub died_at: DateTime<Utc>,
}

impl DeadItem {
    pub fn from_work_item(item: &WorkItem) -> DeadItem {
        DeadItem {
            id: item.id(),
            organization_id: item.organization_id().to_string(),
            source: item.series_key(),
            event_type: item.event_type().to_string(),
            retry_count: item.retry_count(),
            errors: item.errors().to_vec(),
            died_at: Utc::now(),
        }
    }
}

/// Bounded in-memory dead-letter store. Oldest entries are discarded once the
/// cap is reached; the store exists for inspection, not durability.
pub struct DeadLetterStore {
    items: Mutex<VecDeque<DeadItem>>,
    capacity: usize,
}

impl DeadLetterStore {
    pub fn new(capacity: usize) -> DeadLetterStore {
        DeadLetterStore {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, item: DeadItem) {
        let mut items = self.items.lock().expect("dead letter store poisoned");
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("dead letter store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<DeadItem> {
        self.items
            .lock()
            .expect("dead letter store poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use std::collections::HashMap;

    fn webhook_item() -> WorkItem {
        WorkItem::Webhook(Box::new(IngestionEvent::new(
            Provider::Stripe,
            "acme",
            "invoice.paid",
            serde_json::json!({"id": "evt_1"}),
            HashMap::new(),
            true,
            None,
        )))
    }

    #[test]
    fn dead_letter_store_caps_entries() {
        let store = DeadLetterStore::new(2);
        for _ in 0..3 {
            store.push(DeadItem::from_work_item(&webhook_item()));
        }
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn series_key_distinguishes_paths() {
        let item = webhook_item();
        assert_eq!(item.series_key(), "webhook:stripe:acme");

        let stream = WorkItem::Stream {
            message: Box::new(StreamMessage::new(
                "orders",
                "acme",
                serde_json::json!({}),
                "orders",
                0,
                1,
            )),
            config: Arc::new(
                serde_json::from_value(serde_json::json!({
                    "stream_id": "orders",
                    "organization_id": "acme",
                    "transport_type": "socket",
                    "connection": "127.0.0.1:9000",
                    "topics": ["orders"]
                }))
                .unwrap(),
            ),
        };
        assert_eq!(stream.series_key(), "stream:orders");
    }
}
