//! Short-TTL cache for hot-path unread counts.
//!
//! Entries are stored in memory with a per-entry expiry. The cache is strictly
//! best-effort: a miss or an expired entry degrades to a direct store read,
//! never to an error surfaced to the caller.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug, Clone)]
struct CachedCount {
    value: u64,
    expires_at: Instant,
}

/// Concurrent key/value cache of per-user unread counts.
pub struct CounterCache {
    entries: DashMap<String, CachedCount>,
    ttl: Duration,
}

impl CounterCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a cached count. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<u64> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                CACHE_HITS_TOTAL.inc();
                return Some(entry.value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        CACHE_MISSES_TOTAL.inc();
        None
    }

    /// Store a count under the configured TTL.
    pub fn set(&self, key: &str, value: u64) {
        self.entries.insert(
            key.to_string(),
            CachedCount {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop a cached entry. Invalidation on write keeps reads within one
    /// store round-trip of the truth, not one TTL.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
