use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use common_types::NormalizedRecord;

use crate::sinks::{RecordSink, SinkError};

/// Collects records in memory. Tests use it to count downstream deliveries
/// and to script failures.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<NormalizedRecord>>,
    fail_next: AtomicU32,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Make the next `count` sends fail before succeeding again.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<NormalizedRecord> {
        self.records.lock().expect("memory sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn send(&self, record: &NormalizedRecord) -> Result<(), SinkError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_next
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(SinkError::Request("scripted failure".to_string()));
        }
        self.records
            .lock()
            .expect("memory sink poisoned")
            .push(record.clone());
        Ok(())
    }
}
