//! Threshold-based context-flush tracking, per session.
//!
//! Backs the MCP `compact_context` tool: callers report characters written
//! since the last compaction, and `should_flush` tells them whether a
//! rollup/gist pass is due. Counts reset on every `compact_context` call
//! regardless of whether the threshold was actually crossed, matching the
//! tool's "compact now" semantics rather than a pure watermark.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct FlushConfig {
    pub trigger_chars: u64,
    pub min_events: u64,
    pub max_events: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self { trigger_chars: 20_000, min_events: 3, max_events: 200 }
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    chars: AtomicU64,
    events: AtomicU64,
}

pub struct FlushTracker {
    config: FlushConfig,
    sessions: DashMap<String, SessionCounters>,
}

impl FlushTracker {
    pub fn new(config: FlushConfig) -> Self {
        Self { config, sessions: DashMap::new() }
    }

    fn normalize(session_id: &str) -> String {
        let trimmed = session_id.trim();
        if trimmed.is_empty() { "default".to_string() } else { trimmed.to_string() }
    }

    /// Record an event of `char_count` characters for `session_id`.
    pub fn record(&self, session_id: &str, char_count: u64) {
        let key = Self::normalize(session_id);
        let counters = self.sessions.entry(key).or_default();
        counters.chars.fetch_add(char_count, Ordering::SeqCst);
        counters.events.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether `session_id` has accumulated enough to warrant a compaction.
    ///
    /// Never fires before `min_events`, regardless of character volume, so a
    /// single huge paste doesn't trigger a rollup of a session that's barely
    /// started.
    pub fn should_flush(&self, session_id: &str) -> bool {
        let key = Self::normalize(session_id);
        let Some(counters) = self.sessions.get(&key) else { return false };
        let events = counters.events.load(Ordering::SeqCst);
        if events < self.config.min_events {
            return false;
        }
        events >= self.config.max_events || counters.chars.load(Ordering::SeqCst) >= self.config.trigger_chars
    }

    /// Reset counters for `session_id`, as happens on every `compact_context` call.
    pub fn reset(&self, session_id: &str) {
        let key = Self::normalize(session_id);
        self.sessions.remove(&key);
    }

    pub fn snapshot(&self, session_id: &str) -> (u64, u64) {
        let key = Self::normalize(session_id);
        match self.sessions.get(&key) {
            Some(c) => (c.chars.load(Ordering::SeqCst), c.events.load(Ordering::SeqCst)),
            None => (0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_flush_before_min_events() {
        let tracker = FlushTracker::new(FlushConfig { trigger_chars: 10, min_events: 3, max_events: 200 });
        tracker.record("s1", 1000);
        assert!(!tracker.should_flush("s1"));
    }

    #[test]
    fn flushes_once_char_trigger_and_min_events_both_met() {
        let tracker = FlushTracker::new(FlushConfig { trigger_chars: 100, min_events: 2, max_events: 200 });
        tracker.record("s1", 60);
        tracker.record("s1", 60);
        assert!(tracker.should_flush("s1"));
    }

    #[test]
    fn flushes_once_max_events_met_even_with_few_chars() {
        let tracker = FlushTracker::new(FlushConfig { trigger_chars: 1_000_000, min_events: 1, max_events: 3 });
        tracker.record("s1", 1);
        tracker.record("s1", 1);
        tracker.record("s1", 1);
        assert!(tracker.should_flush("s1"));
    }

    #[test]
    fn reset_clears_counters() {
        let tracker = FlushTracker::new(FlushConfig { trigger_chars: 10, min_events: 1, max_events: 200 });
        tracker.record("s1", 100);
        assert!(tracker.should_flush("s1"));
        tracker.reset("s1");
        assert!(!tracker.should_flush("s1"));
        assert_eq!(tracker.snapshot("s1"), (0, 0));
    }

    #[test]
    fn sessions_are_independent() {
        let tracker = FlushTracker::new(FlushConfig { trigger_chars: 10, min_events: 1, max_events: 200 });
        tracker.record("s1", 100);
        assert!(tracker.should_flush("s1"));
        assert!(!tracker.should_flush("s2"));
    }
}
