use serde::{Deserialize, Serialize};

use crate::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    /// Legacy providers still sign with HMAC-SHA1.
    Sha1,
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            _ => Err(format!("unknown signature algorithm: {s}")),
        }
    }
}

/// Per-endpoint webhook configuration, owned by the admin API and resolved on
/// every inbound request by (provider, organization).
///
/// `secret_key: None` means the endpoint explicitly accepts unsigned payloads.
/// It is never conflated with a signature that failed to verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint_id: String,
    pub organization_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    /// Empty means all event types are accepted.
    #[serde(default)]
    pub allowed_event_types: Vec<String>,
    #[serde(default = "default_requests_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_signature_header() -> String {
    "x-webhook-signature".to_string()
}

fn default_requests_per_minute() -> u32 {
    1000
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl EndpointConfig {
    /// Fallback configuration for providers with no registered endpoint:
    /// unauthenticated, default limits.
    pub fn generic(organization_id: &str) -> EndpointConfig {
        EndpointConfig {
            endpoint_id: format!("generic:{organization_id}"),
            organization_id: organization_id.to_string(),
            provider: Provider::Generic,
            secret_key: None,
            signature_header: default_signature_header(),
            signature_algorithm: SignatureAlgorithm::default(),
            allowed_event_types: Vec::new(),
            max_requests_per_minute: default_requests_per_minute(),
            max_payload_bytes: default_max_payload_bytes(),
            active: true,
        }
    }

    pub fn accepts_event_type(&self, event_type: &str) -> bool {
        self.allowed_event_types.is_empty()
            || self.allowed_event_types.iter().any(|t| t == event_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    BrokerQueue,
    CacheStream,
    Socket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Contains,
    Gt,
    Lt,
}

/// Predicate over a (dotted) payload field. Messages failing a filter are
/// dropped without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

/// Copies `source` (dotted path) into `target` on the normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    pub organization_id: String,
    pub transport_type: TransportType,
    /// Kafka brokers, redis URL or socket address, depending on transport.
    pub connection: String,
    pub topics: Vec<String>,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_consumer_group() -> String {
    "siphon".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    1000
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_concurrency() -> usize {
    4
}
