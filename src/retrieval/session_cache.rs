//! Per-session result cache: repeated searches for the same session+query
//! within a short half-life return the cached result set without
//! re-running the pipeline, up to a bounded number of cache hits per entry.
//!
//! Supplements the spec's retrieval pipeline; grounded in the
//! `RUNTIME_SESSION_CACHE_*` environment keys, which imply a cache existed
//! upstream even though the pipeline's§4.4 description doesn't name it.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    pub max_hits: u32,
    pub half_life: Duration,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self { max_hits: 5, half_life: Duration::from_secs(60) }
    }
}

struct Entry<T> {
    value: T,
    inserted_at: Instant,
    hits: u32,
}

/// Keyed by `(session_id, normalized_query)`.
pub struct SessionCache<T: Clone> {
    config: SessionCacheConfig,
    entries: DashMap<(String, String), Entry<T>>,
}

impl<T: Clone> SessionCache<T> {
    pub fn new(config: SessionCacheConfig) -> Self {
        Self { config, entries: DashMap::new() }
    }

    pub fn get(&self, session_id: &str, query: &str) -> Option<T> {
        let key = (session_id.to_string(), query.to_string());
        let mut entry = self.entries.get_mut(&key)?;
        if entry.inserted_at.elapsed() > self.config.half_life * 2 || entry.hits >= self.config.max_hits {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.hits += 1;
        Some(entry.value.clone())
    }

    pub fn put(&self, session_id: &str, query: &str, value: T) {
        let key = (session_id.to_string(), query.to_string());
        self.entries.insert(key, Entry { value, inserted_at: Instant::now(), hits: 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_expires_by_hit_count() {
        let cache = SessionCache::new(SessionCacheConfig { max_hits: 2, half_life: Duration::from_secs(60) });
        cache.put("s1", "q", 42_i32);
        assert_eq!(cache.get("s1", "q"), Some(42));
        assert_eq!(cache.get("s1", "q"), Some(42));
        assert_eq!(cache.get("s1", "q"), None);
    }

    #[test]
    fn distinct_sessions_do_not_share_entries() {
        let cache = SessionCache::new(SessionCacheConfig::default());
        cache.put("s1", "q", 1_i32);
        assert_eq!(cache.get("s2", "q"), None);
    }
}
