use std::time::Duration;

use async_trait::async_trait;
use common_types::NormalizedRecord;
use metrics::{counter, histogram};
use reqwest::header;

use crate::sinks::{RecordSink, SinkError};

/// Delivers records to the downstream consumer as JSON POSTs. The per-call
/// timeout is carried by the client; an elapsed timeout surfaces as
/// `SinkError::Timeout` and is retried like any other failure.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: String, timeout: Duration) -> reqwest::Result<HttpSink> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("siphon-worker")
            .timeout(timeout)
            .build()?;
        Ok(HttpSink { client, url })
    }
}

#[async_trait]
impl RecordSink for HttpSink {
    async fn send(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let start = tokio::time::Instant::now();
        let result = self.client.post(&self.url).json(record).send().await;
        histogram!("sink_send_duration_seconds").record(start.elapsed().as_secs_f64());

        let response = result.map_err(|err| {
            if err.is_timeout() {
                SinkError::Timeout
            } else {
                SinkError::Request(err.to_string())
            }
        })?;

        if response.status().is_success() {
            counter!("sink_records_sent_total").increment(1);
            Ok(())
        } else {
            Err(SinkError::Status(response.status().as_u16()))
        }
    }
}
