use std::time::Duration;

use async_trait::async_trait;
use common_types::StreamConfig;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::debug;

use crate::transport::{RawItem, StreamTransport, TransportError};

/// Plain TCP transport reading newline-delimited frames. The peer protocol
/// has no acknowledgement, so `ack` is a no-op and redelivery after a crash
/// is up to the peer.
pub struct SocketTransport {
    lines: Lines<BufReader<TcpStream>>,
    topic: String,
    next_offset: i64,
}

impl SocketTransport {
    pub async fn connect(config: &StreamConfig) -> Result<SocketTransport, TransportError> {
        let stream = TcpStream::connect(&config.connection)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(stream = %config.stream_id, peer = %config.connection, "socket connected");
        Ok(SocketTransport {
            lines: BufReader::new(stream).lines(),
            topic: config
                .topics
                .first()
                .cloned()
                .unwrap_or_else(|| "socket".to_string()),
            next_offset: 0,
        })
    }
}

#[async_trait]
impl StreamTransport for SocketTransport {
    async fn fetch(
        &mut self,
        max_items: usize,
        timeout: Duration,
    ) -> Result<Vec<RawItem>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut items = Vec::new();
        while items.len() < max_items {
            match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Err(_) => break,
                Ok(Err(err)) => return Err(TransportError::Fetch(err.to_string())),
                Ok(Ok(None)) => {
                    if items.is_empty() {
                        return Err(TransportError::Fetch("connection closed".to_string()));
                    }
                    break;
                }
                Ok(Ok(Some(line))) => {
                    let offset = self.next_offset;
                    self.next_offset += 1;
                    items.push(RawItem {
                        topic: self.topic.clone(),
                        partition: 0,
                        offset,
                        ack_id: String::new(),
                        payload: line.into_bytes(),
                    });
                }
            }
        }
        Ok(items)
    }

    async fn ack(&mut self, _item: &RawItem) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn config(address: &str) -> StreamConfig {
        serde_json::from_value(json!({
            "stream_id": "lines",
            "organization_id": "acme",
            "transport_type": "socket",
            "connection": address,
            "topics": ["lines"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn reads_newline_delimited_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"{\"a\":1}\n{\"a\":2}\n").await.unwrap();
            socket.flush().await.unwrap();
            // keep the connection open past the fetch deadline
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = SocketTransport::connect(&config(&address)).await.unwrap();
        let items = transport
            .fetch(10, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].payload, b"{\"a\":1}");
        assert_eq!(items[0].offset, 0);
        assert_eq!(items[1].offset, 1);
        transport.ack(&items[0]).await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_is_a_fetch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = SocketTransport::connect(&config(&address)).await.unwrap();
        let result = transport.fetch(10, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::Fetch(_))));
    }
}
