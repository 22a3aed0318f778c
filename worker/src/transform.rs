use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common_types::{
    FieldMapping, IngestionEvent, NormalizedRecord, Provider, RecordSource, StreamMessage,
    WorkItem,
};
use serde_json::{Map, Value};

use crate::filters::lookup;

/// Provider-specific view extracted from a raw payload. Fields left `None`
/// fall back to what the gateway recorded at ingress.
pub struct Normalized {
    pub event_type: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub properties: Map<String, Value>,
}

type Normalizer = fn(&IngestionEvent) -> Normalized;

/// Maps a provider tag to its normalization function. New providers register
/// a function here instead of subclassing anything.
pub struct TransformRegistry {
    normalizers: HashMap<Provider, Normalizer>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = TransformRegistry {
            normalizers: HashMap::new(),
        };
        registry.register(Provider::Stripe, normalize_stripe);
        registry.register(Provider::Salesforce, normalize_salesforce);
        registry.register(Provider::Shopify, normalize_shopify);
        registry.register(Provider::Generic, normalize_generic);
        registry
    }
}

impl TransformRegistry {
    pub fn register(&mut self, provider: Provider, normalizer: Normalizer) {
        self.normalizers.insert(provider, normalizer);
    }

    pub fn normalize(&self, event: &IngestionEvent) -> Normalized {
        let normalizer = self
            .normalizers
            .get(&event.provider)
            .copied()
            .unwrap_or(normalize_generic);
        normalizer(event)
    }
}

/// Produce the downstream-ready record for a unit of work. Webhook events go
/// through the provider registry; stream messages apply their configured
/// field mappings.
pub fn transform(registry: &TransformRegistry, item: &WorkItem) -> NormalizedRecord {
    match item {
        WorkItem::Webhook(event) => transform_webhook(registry, event),
        WorkItem::Stream { message, config } => {
            transform_stream(message, &config.field_mappings)
        }
    }
}

fn transform_webhook(registry: &TransformRegistry, event: &IngestionEvent) -> NormalizedRecord {
    let normalized = registry.normalize(event);
    NormalizedRecord {
        id: event.id,
        organization_id: event.organization_id.clone(),
        source: RecordSource::Webhook {
            provider: event.provider.to_string(),
        },
        event_type: normalized
            .event_type
            .unwrap_or_else(|| event.event_type.clone()),
        occurred_at: normalized.occurred_at,
        received_at: event.received_at,
        properties: normalized.properties,
    }
}

fn transform_stream(message: &StreamMessage, mappings: &[FieldMapping]) -> NormalizedRecord {
    let properties = if mappings.is_empty() {
        as_properties(&message.payload)
    } else {
        let mut properties = Map::new();
        for mapping in mappings {
            if let Some(value) = lookup(&message.payload, &mapping.source) {
                properties.insert(mapping.target.clone(), value.clone());
            }
        }
        properties
    };

    let event_type = message
        .payload
        .get("event_type")
        .or_else(|| message.payload.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("stream_message")
        .to_string();

    NormalizedRecord {
        id: message.id,
        organization_id: message.organization_id.clone(),
        source: RecordSource::Stream {
            stream_id: message.stream_id.clone(),
        },
        event_type,
        occurred_at: Some(message.timestamp),
        received_at: message.timestamp,
        properties,
    }
}

/// Wrap a non-object payload so the record always carries an object.
fn as_properties(payload: &Value) -> Map<String, Value> {
    match payload {
        Value::Object(object) => object.clone(),
        other => {
            let mut properties = Map::new();
            properties.insert("payload".to_string(), other.clone());
            properties
        }
    }
}

fn parse_rfc3339(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn normalize_stripe(event: &IngestionEvent) -> Normalized {
    let payload = &event.payload;
    let properties = match payload.pointer("/data/object") {
        Some(Value::Object(object)) => object.clone(),
        _ => as_properties(payload),
    };
    Normalized {
        event_type: payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string),
        occurred_at: payload
            .get("created")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        properties,
    }
}

fn normalize_salesforce(event: &IngestionEvent) -> Normalized {
    let payload = &event.payload;
    let properties = match payload.get("payload") {
        Some(Value::Object(object)) => object.clone(),
        _ => as_properties(payload),
    };
    Normalized {
        event_type: payload
            .get("eventType")
            .and_then(Value::as_str)
            .map(str::to_string),
        occurred_at: parse_rfc3339(payload.get("createdDate")),
        properties,
    }
}

fn normalize_shopify(event: &IngestionEvent) -> Normalized {
    Normalized {
        // Shopify carries the topic in a header rather than the body.
        event_type: event.headers.get("x-shopify-topic").cloned(),
        occurred_at: parse_rfc3339(event.payload.get("created_at")),
        properties: as_properties(&event.payload),
    }
}

fn normalize_generic(event: &IngestionEvent) -> Normalized {
    Normalized {
        event_type: None,
        occurred_at: parse_rfc3339(event.payload.get("timestamp")),
        properties: as_properties(&event.payload),
    }
}
