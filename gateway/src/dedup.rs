use std::sync::Arc;
use std::time::Duration;

use expiring::ExpiringMap;
use metrics::counter;

/// Collapses repeated deliveries of the same content hash within a retention
/// window. The check-and-insert is atomic, so two identical deliveries
/// racing each other still produce exactly one admitted event.
pub struct DuplicateDetector {
    seen: Arc<ExpiringMap<String, ()>>,
}

impl DuplicateDetector {
    pub fn new(retention: Duration) -> DuplicateDetector {
        DuplicateDetector {
            seen: Arc::new(ExpiringMap::new("dedup", retention)),
        }
    }

    /// True if `hash` was seen within the retention window. Records the hash
    /// either way, so the window slides from the most recent delivery.
    pub fn is_duplicate_and_record(&self, hash: &str) -> bool {
        let duplicate = self.seen.check_and_record(hash.to_string(), ());
        if duplicate {
            counter!("gateway_duplicate_events_total").increment(1);
        }
        duplicate
    }

    /// The backing cache, for the periodic sweeper.
    pub fn table(&self) -> Arc<ExpiringMap<String, ()>> {
        self.seen.clone()
    }
}
