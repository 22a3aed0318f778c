use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::ErrorEntry;
use crate::status::{EventStatus, InvalidTransition};

/// One item pulled from an external stream transport and admitted to a
/// stream buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    pub id: Uuid,
    pub stream_id: String,
    pub organization_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    pub status: EventStatus,
    pub retry_count: u32,
    pub errors: Vec<ErrorEntry>,
    /// Milliseconds from admission to terminal status, set by the worker.
    pub processing_latency_ms: Option<u64>,
}

impl StreamMessage {
    pub fn new(
        stream_id: &str,
        organization_id: &str,
        payload: serde_json::Value,
        source_topic: &str,
        source_partition: i32,
        source_offset: i64,
    ) -> StreamMessage {
        let timestamp = payload
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        StreamMessage {
            id: Uuid::now_v7(),
            stream_id: stream_id.to_string(),
            organization_id: organization_id.to_string(),
            timestamp,
            payload,
            source_topic: source_topic.to_string(),
            source_partition,
            source_offset,
            status: EventStatus::Received,
            retry_count: 0,
            errors: Vec::new(),
            processing_latency_ms: None,
        }
    }

    pub fn transition(&mut self, to: EventStatus) -> Result<(), InvalidTransition> {
        self.status.transition(to)
    }

    pub fn record_error(&mut self, message: String) {
        self.errors.push(ErrorEntry {
            attempt: self.retry_count,
            at: Utc::now(),
            message,
        });
    }
}
