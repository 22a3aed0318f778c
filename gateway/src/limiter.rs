use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use expiring::ExpiringMap;
use metrics::counter;
use tokio::time::Instant;

/// Sliding-window request limiter keyed by (organization, source). Each call
/// prunes timestamps older than the window before counting; keys idle for a
/// full window are dropped by the shared sweeper.
pub struct RateLimiter {
    windows: Arc<ExpiringMap<String, VecDeque<Instant>>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> RateLimiter {
        RateLimiter {
            windows: Arc::new(ExpiringMap::new("rate_limiter", window)),
            window,
        }
    }

    /// Record one request for `key` if the window has room. A denied call is
    /// not recorded and does not keep the key alive.
    pub fn acquire(&self, key: &str, max_per_window: u32) -> bool {
        let now = Instant::now();
        let window = self.window;
        let allowed = self.windows.with_entry(
            key.to_string(),
            VecDeque::new,
            |stamps| {
                while stamps
                    .front()
                    .is_some_and(|stamp| now.duration_since(*stamp) >= window)
                {
                    stamps.pop_front();
                }
                if stamps.len() >= max_per_window as usize {
                    (false, false)
                } else {
                    stamps.push_back(now);
                    (true, true)
                }
            },
        );
        if !allowed {
            counter!("gateway_rate_limited_total", "key" => key.to_string()).increment(1);
        }
        allowed
    }

    /// The backing table, for the periodic sweeper.
    pub fn table(&self) -> Arc<ExpiringMap<String, VecDeque<Instant>>> {
        self.windows.clone()
    }
}
