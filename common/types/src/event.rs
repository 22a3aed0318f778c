use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Provider;
use crate::status::{EventStatus, InvalidTransition};

/// One recorded processing failure. The full list is retained on the event so
/// dead-lettered work can be inspected with its complete error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// A webhook delivery accepted by the ingestion gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub id: Uuid,
    pub provider: Provider,
    pub organization_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub headers: HashMap<String, String>,
    pub signature_valid: bool,
    pub duplicate: bool,
    pub status: EventStatus,
    pub retry_count: u32,
    pub errors: Vec<ErrorEntry>,
    pub source_ip: Option<String>,
}

impl IngestionEvent {
    pub fn new(
        provider: Provider,
        organization_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
        signature_valid: bool,
        source_ip: Option<String>,
    ) -> IngestionEvent {
        IngestionEvent {
            id: Uuid::now_v7(),
            provider,
            organization_id: organization_id.to_string(),
            event_type: event_type.to_string(),
            received_at: Utc::now(),
            payload,
            headers,
            signature_valid,
            duplicate: false,
            status: EventStatus::Received,
            retry_count: 0,
            errors: Vec::new(),
            source_ip,
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
