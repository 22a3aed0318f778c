use async_trait::async_trait;
use common_types::NormalizedRecord;
use thiserror::Error;

pub mod http;
pub mod memory;
pub mod print;

pub use http::HttpSink;
pub use memory::MemorySink;
pub use print::PrintSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("downstream request failed: {0}")]
    Request(String),
    #[error("downstream returned status {0}")]
    Status(u16),
    /// A timed-out send counts as a failure like any other.
    #[error("downstream send timed out")]
    Timeout,
}

/// The downstream analytics consumer, used identically by the webhook and
/// stream paths. Implementations must be safe to call concurrently.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, record: &NormalizedRecord) -> Result<(), SinkError>;
}
