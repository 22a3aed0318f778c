use std::time::Duration;

use async_trait::async_trait;
use common_types::StreamConfig;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::debug;

use crate::transport::{RawItem, StreamTransport, TransportError};

/// Redis-streams transport using consumer groups: XREADGROUP to fetch, XACK
/// after buffer admission. Entries not acked before a crash stay in the
/// pending list and are redelivered to the group.
pub struct RedisStreamTransport {
    conn: redis::aio::MultiplexedConnection,
    group: String,
    consumer_name: String,
    keys: Vec<String>,
}

impl RedisStreamTransport {
    pub async fn connect(config: &StreamConfig) -> Result<RedisStreamTransport, TransportError> {
        let client = redis::Client::open(config.connection.as_str())
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        for key in &config.topics {
            // Create the group at the stream tail; BUSYGROUP means another
            // consumer got there first.
            let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(key)
                .arg(&config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            if let Err(err) = created {
                if !err.to_string().contains("BUSYGROUP") {
                    return Err(TransportError::Connect(err.to_string()));
                }
            }
        }

        let consumer_name = format!("{}-{}", config.stream_id, std::process::id());
        debug!(stream = %config.stream_id, consumer = %consumer_name, "redis stream consumer ready");
        Ok(RedisStreamTransport {
            conn,
            group: config.consumer_group.clone(),
            consumer_name,
            keys: config.topics.clone(),
        })
    }
}

#[async_trait]
impl StreamTransport for RedisStreamTransport {
    async fn fetch(
        &mut self,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<RawItem>, TransportError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(max_items)
            .block(timeout.as_millis() as usize);
        let ids: Vec<&str> = self.keys.iter().map(|_| ">").collect();
        let reply: StreamReadReply = self
            .conn
            .xread_options(&self.keys, &ids, &options)
            .await
            .map_err(|err| TransportError::Fetch(err.to_string()))?;

        let mut items = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                // Redis entry ids are "<ms>-<seq>"; the millisecond part
                // serves as a monotonic-enough offset for bookkeeping.
                let offset = entry
                    .id
                    .split('-')
                    .next()
                    .and_then(|ms| ms.parse().ok())
                    .unwrap_or(0);
                let payload: Vec<u8> = entry.get("data").unwrap_or_default();
                items.push(RawItem {
                    topic: stream.key.clone(),
                    partition: 0,
                    offset,
                    ack_id: entry.id.clone(),
                    payload,
                });
            }
        }
        Ok(items)
    }

    async fn ack(&mut self, item: &RawItem) -> Result<(), TransportError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&item.topic)
            .arg(&self.group)
            .arg(&item.ack_id)
            .query_async(&mut self.conn)
            .await
            .map_err(|err| TransportError::Ack(err.to_string()))?;
        Ok(())
    }
}
