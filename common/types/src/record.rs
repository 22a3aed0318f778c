use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordSource {
    Webhook { provider: String },
    Stream { stream_id: String },
}

/// The downstream-ready form of an event, produced by the worker transform
/// step and handed to the sink. Both ingestion paths converge on this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub source: RecordSource,
    pub event_type: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}
