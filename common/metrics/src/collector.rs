use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

/// Throughput, latency and error-rate aggregation per endpoint/stream over
/// trailing one-minute and one-hour windows. Read-only consumers (the stats
/// route, alerting) take JSON snapshots; the prometheus recorder covers raw
/// counters separately.
pub struct MetricsCollector {
    series: DashMap<String, Arc<RollingStats>>,
    total_processed: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        MetricsCollector::new()
    }
}

impl MetricsCollector {
    pub fn new() -> MetricsCollector {
        MetricsCollector {
            series: DashMap::new(),
            total_processed: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, key: &str, latency_ms: f64) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        self.stats_for(key).record(true, latency_ms);
    }

    pub fn record_failure(&self, key: &str, latency_ms: f64) {
        self.stats_for(key).record(false, latency_ms);
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        let now = now_secs();
        let mut series: Vec<SeriesSnapshot> = self
            .series
            .iter()
            .map(|entry| SeriesSnapshot {
                key: entry.key().clone(),
                last_minute: entry.value().minute.stats_at(now),
                last_hour: entry.value().hour.stats_at(now),
            })
            .collect();
        series.sort_by(|a, b| a.key.cmp(&b.key));
        series
    }

    fn stats_for(&self, key: &str) -> Arc<RollingStats> {
        self.series
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RollingStats::new()))
            .clone()
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesSnapshot {
    pub key: String,
    pub last_minute: WindowStats,
    pub last_hour: WindowStats,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct WindowStats {
    pub total: u64,
    pub errors: u64,
    pub messages_per_second: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

struct RollingStats {
    minute: RollingWindow,
    hour: RollingWindow,
}

impl RollingStats {
    fn new() -> RollingStats {
        RollingStats {
            minute: RollingWindow::new(1, 60),
            hour: RollingWindow::new(60, 60),
        }
    }

    fn record(&self, success: bool, latency_ms: f64) {
        let now = now_secs();
        self.minute.record_at(now, success, latency_ms);
        self.hour.record_at(now, success, latency_ms);
    }
}

/// Fixed ring of time buckets. Each slot remembers the absolute bucket index
/// it was last written in, so stale slots are discarded lazily instead of by
/// a background task.
struct RollingWindow {
    bucket_secs: u64,
    slots: Mutex<Vec<Slot>>,
}

#[derive(Clone, Copy, Default)]
struct Slot {
    stamp: u64,
    total: u64,
    errors: u64,
    latency_ms_sum: f64,
}

impl RollingWindow {
    fn new(bucket_secs: u64, slot_count: usize) -> RollingWindow {
        RollingWindow {
            bucket_secs,
            slots: Mutex::new(vec![Slot::default(); slot_count]),
        }
    }

    fn record_at(&self, now_secs: u64, success: bool, latency_ms: f64) {
        let bucket = now_secs / self.bucket_secs;
        let mut slots = self.slots.lock().expect("rolling window poisoned");
        let idx = (bucket % slots.len() as u64) as usize;
        let slot = &mut slots[idx];
        if slot.stamp != bucket {
            *slot = Slot {
                stamp: bucket,
                ..Slot::default()
            };
        }
        slot.total += 1;
        if !success {
            slot.errors += 1;
        }
        slot.latency_ms_sum += latency_ms;
    }

    fn stats_at(&self, now_secs: u64) -> WindowStats {
        let bucket = now_secs / self.bucket_secs;
        let slots = self.slots.lock().expect("rolling window poisoned");
        let oldest = bucket.saturating_sub(slots.len() as u64 - 1);

        let mut total = 0u64;
        let mut errors = 0u64;
        let mut latency_ms_sum = 0f64;
        for slot in slots.iter() {
            if slot.stamp >= oldest && slot.stamp <= bucket {
                total += slot.total;
                errors += slot.errors;
                latency_ms_sum += slot.latency_ms_sum;
            }
        }

        let window_secs = (slots.len() as u64 * self.bucket_secs) as f64;
        WindowStats {
            total,
            errors,
            messages_per_second: total as f64 / window_secs,
            avg_latency_ms: if total > 0 {
                latency_ms_sum / total as f64
            } else {
                0.0
            },
            error_rate: if total > 0 {
                errors as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
