use std::time::Duration;

use async_trait::async_trait;
use common_types::{StreamConfig, TransportType};
use thiserror::Error;

use crate::kafka::KafkaTransport;
use crate::redis::RedisStreamTransport;
use crate::socket::SocketTransport;

/// One item as pulled from an external transport, before deserialization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Transport-specific acknowledgement token (redis entry id). Empty for
    /// transports that acknowledge by offset alone.
    pub ack_id: String,
    pub payload: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("ack failed: {0}")]
    Ack(String),
}

/// The minimal capability surface a consumer needs from a transport: fetch a
/// batch, acknowledge an item. Connecting is the factory's job.
#[async_trait]
pub trait StreamTransport: Send {
    /// Pull up to `max_items`, returning what arrived once `timeout`
    /// elapses. An empty batch is not an error.
    async fn fetch(
        &mut self,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<RawItem>, TransportError>;

    /// Acknowledge one item. The consumer calls this only after the item was
    /// admitted to its buffer, so a crash in between causes redelivery.
    async fn ack(&mut self, item: &RawItem) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        config: &StreamConfig,
    ) -> Result<Box<dyn StreamTransport>, TransportError>;
}

/// Connects the real transport for each configured type.
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn connect(
        &self,
        config: &StreamConfig,
    ) -> Result<Box<dyn StreamTransport>, TransportError> {
        match config.transport_type {
            TransportType::BrokerQueue => Ok(Box::new(KafkaTransport::connect(config)?)),
            TransportType::CacheStream => {
                Ok(Box::new(RedisStreamTransport::connect(config).await?))
            }
            TransportType::Socket => Ok(Box::new(SocketTransport::connect(config).await?)),
        }
    }
}
