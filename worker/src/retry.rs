use std::time::Duration;

/// Retry parameters for failed deliveries: exponential backoff from
/// `base_interval`, capped at `maximum_interval`, for up to `max_retries`
/// attempts after the initial one.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_interval: Duration,
    pub maximum_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_interval: Duration, maximum_interval: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_interval,
            maximum_interval,
        }
    }

    /// Delay before the retry following `retry_count` completed failed
    /// attempts: min(maximum, base * 2^retry_count).
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        std::cmp::min(
            self.maximum_interval,
            self.base_interval.saturating_mul(factor),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_interval: Duration::from_secs(1),
            maximum_interval: Duration::from_secs(30),
        }
    }
}
