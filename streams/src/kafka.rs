use std::time::Duration;

use async_trait::async_trait;
use common_types::StreamConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use tracing::debug;

use crate::transport::{RawItem, StreamTransport, TransportError};

/// Kafka-backed transport. Offset storing is manual: the committed cursor
/// only advances past items the consumer has acknowledged, so anything
/// fetched but not admitted is redelivered after a restart.
pub struct KafkaTransport {
    consumer: StreamConsumer,
}

impl KafkaTransport {
    pub fn connect(config: &StreamConfig) -> Result<KafkaTransport, TransportError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.connection)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(stream = %config.stream_id, topics = ?config.topics, "kafka consumer subscribed");
        Ok(KafkaTransport { consumer })
    }
}

#[async_trait]
impl StreamTransport for KafkaTransport {
    async fn fetch(
        &mut self,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<RawItem>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut items = Vec::new();
        while items.len() < max_items {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(err)) => return Err(TransportError::Fetch(err.to_string())),
                Ok(Ok(message)) => items.push(RawItem {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    ack_id: String::new(),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                }),
            }
        }
        Ok(items)
    }

    async fn ack(&mut self, item: &RawItem) -> Result<(), TransportError> {
        self.consumer
            .store_offset(&item.topic, item.partition, item.offset)
            .map_err(|err| TransportError::Ack(err.to_string()))
    }
}
