use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::gauge;
use tokio::time::Instant;
use tracing::debug;

/// A concurrent map whose entries expire a fixed retention after their last
/// touch. Backs both the rate-limiter table (values are timestamp windows)
/// and the duplicate-detection cache (values are unit), replacing separate
/// ad hoc sweep loops with one abstraction.
///
/// All mutation happens under the shard lock of the dashmap entry, so
/// check-and-insert and read-modify-write are atomic with respect to
/// concurrent callers of the same key.
pub struct ExpiringMap<K, V> {
    inner: DashMap<K, Stamped<V>>,
    retention: Duration,
    name: &'static str,
}

struct Stamped<V> {
    value: V,
    touched: Instant,
}

impl<K, V> ExpiringMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(name: &'static str, retention: Duration) -> ExpiringMap<K, V> {
        ExpiringMap {
            inner: DashMap::new(),
            retention,
            name,
        }
    }

    /// Atomic check-and-insert: returns true if the key was already present
    /// and unexpired (refreshing its touch time), false if it was inserted.
    pub fn check_and_record(&self, key: K, value: V) -> bool {
        let now = Instant::now();
        match self.inner.entry(key) {
            Entry::Occupied(mut occupied) => {
                let expired = now.duration_since(occupied.get().touched) >= self.retention;
                let entry = occupied.get_mut();
                entry.touched = now;
                if expired {
                    entry.value = value;
                }
                !expired
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Stamped { value, touched: now });
                false
            }
        }
    }

    /// Run `f` against the value for `key`, inserting `init()` first if the
    /// key is absent or its entry has expired. `f` returns the caller's
    /// result plus whether to refresh the touch time, so denied callers do
    /// not keep a key alive.
    pub fn with_entry<R>(
        &self,
        key: K,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> (R, bool),
    ) -> R {
        let now = Instant::now();
        let mut entry = match self.inner.entry(key) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(occupied.get().touched) >= self.retention {
                    occupied.get_mut().value = init();
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(Stamped {
                value: init(),
                touched: now,
            }),
        };
        let stamped = entry.value_mut();
        let (result, touch) = f(&mut stamped.value);
        if touch {
            stamped.touched = now;
        }
        result
    }

    pub fn contains(&self, key: &K) -> bool {
        match self.inner.get(key) {
            Some(entry) => entry.touched.elapsed() < self.retention,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop entries whose last touch is older than the retention window.
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let before = self.inner.len();
        let retention = self.retention;
        self.inner
            .retain(|_, stamped| stamped.touched.elapsed() < retention);
        self.inner.shrink_to_fit();
        before - self.inner.len()
    }
}

/// Periodically sweep the map, reporting its size. Needs to be spawned as a
/// task; runs until the process exits.
pub async fn run_sweeper<K, V>(map: Arc<ExpiringMap<K, V>>, every: Duration)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the immediate first tick would sweep an empty map
    interval.tick().await;
    loop {
        interval.tick().await;
        let evicted = map.sweep();
        gauge!("expiring_map_entries", "map" => map.name).set(map.len() as f64);
        if evicted > 0 {
            debug!(map = map.name, evicted, "swept expired entries");
        }
    }
}
