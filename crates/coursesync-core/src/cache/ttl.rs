use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Deadline used when `now + ttl` does not fit in an `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Shortest period the background sweep will run at.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Generic TTL cache keyed by string.
///
/// TTLs are chosen by the caller on every `set`; the cache itself has no
/// notion of per-resource staleness.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
}

/// A cache shared between request handlers and the sweeper task.
pub type SharedTtlCache<V> = Arc<Mutex<TtlCache<V>>>;

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store `value` under `key` until `ttl` elapses, replacing any existing entry.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.entries
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    /// Return the live value for `key`. An expired entry is evicted and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let now = Instant::now();
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            debug!(key, "Cache entry expired");
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn has(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Invalidate `key`. Returns whether an entry (live or expired) was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Like `get`, but returns an owned copy so the lock can be released.
    pub fn get_cloned(&mut self, key: &str) -> Option<V> {
        self.get(key).cloned()
    }
}

/// Spawn a background task that calls `cleanup()` every `period`.
///
/// Dropping the returned handle does not stop the task; call `abort()` on it.
/// A zero `period` is raised to one millisecond.
pub fn spawn_sweeper<V>(cache: SharedTtlCache<V>, period: Duration) -> JoinHandle<()>
where
    V: Send + 'static,
{
    let period = period.max(MIN_SWEEP_PERIOD);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = match cache.lock() {
                Ok(mut guard) => guard.cleanup(),
                Err(poisoned) => poisoned.into_inner().cleanup(),
            };
            if removed > 0 {
                debug!(removed, "Swept expired cache entries");
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
