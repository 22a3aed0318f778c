use async_trait::async_trait;
use common_types::NormalizedRecord;
use metrics::counter;
use tracing::info;

use crate::sinks::{RecordSink, SinkError};

/// Logs records instead of delivering them. Used when no downstream URL is
/// configured, mostly for local runs.
pub struct PrintSink;

#[async_trait]
impl RecordSink for PrintSink {
    async fn send(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        info!(
            organization_id = %record.organization_id,
            event_type = %record.event_type,
            "record: {}",
            serde_json::to_string(record).unwrap_or_else(|_| "<unserializable>".to_string())
        );
        counter!("sink_records_sent_total").increment(1);
        Ok(())
    }
}
