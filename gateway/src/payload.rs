use common_types::Provider;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::api::IngestError;

/// Parse a webhook body according to its content type. Anything that fails
/// to parse is wrapped as text rather than rejected, since providers are
/// not always strict about what they send.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, IngestError> {
    if body.is_empty() {
        return Err(IngestError::Malformed("empty body".to_string()));
    }

    let kind = content_type
        .unwrap_or("application/json")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match kind.as_str() {
        "application/x-www-form-urlencoded" => {
            match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
                Ok(pairs) => {
                    let mut object = Map::new();
                    for (key, value) in pairs {
                        object.insert(key, Value::String(value));
                    }
                    Ok(Value::Object(object))
                }
                Err(_) => Ok(wrap_text(body)),
            }
        }
        kind if kind.ends_with("json") => {
            Ok(serde_json::from_slice(body).unwrap_or_else(|_| wrap_text(body)))
        }
        _ => Ok(wrap_text(body)),
    }
}

fn wrap_text(body: &[u8]) -> Value {
    json!({ "message": String::from_utf8_lossy(body) })
}

/// Deterministic serialization with recursively sorted object keys, so two
/// deliveries of the same logical payload hash identically regardless of key
/// order.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&object[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Dedup key: sha256 over provider, organization and the canonical payload.
/// Logically identical redeliveries collapse to the same hash.
pub fn content_hash(provider: Provider, organization_id: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(organization_id.as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_string(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Best-effort event type extraction at ingress, used for allow-list checks.
/// The provider-specific transform downstream has the final say.
pub fn extract_event_type(headers: &std::collections::HashMap<String, String>, payload: &Value) -> String {
    if let Some(topic) = headers.get("x-shopify-topic") {
        return topic.clone();
    }
    for key in ["type", "event_type", "eventType", "event"] {
        if let Some(value) = payload.get(key).and_then(Value::as_str) {
            return value.to_string();
        }
    }
    "unknown".to_string()
}
