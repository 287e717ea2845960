//! Rolling bounded windows over search, write-guard, and cleanup-query
//! events, persisted to `runtime_meta` as atomic snapshot replacements so
//! concurrent writers never interleave a lost update.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::storage::{runtime_meta, Store};

const SEARCH_EVENTS_KEY: &str = "observability.search_events.v1";
const GUARD_EVENTS_KEY: &str = "observability.guard_events.v1";
const CLEANUP_EVENTS_KEY: &str = "observability.cleanup_events.v1";

const SEARCH_WINDOW: usize = 200;
const GUARD_WINDOW: usize = 300;
const CLEANUP_WINDOW: usize = 200;

const DEFAULT_SLOW_QUERY_MS: f64 = 250.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvent {
    pub timestamp: String,
    pub mode_requested: String,
    pub mode_applied: String,
    pub latency_ms: f64,
    pub degraded: bool,
    pub degrade_reasons: Vec<String>,
    pub session_count: usize,
    pub global_count: usize,
    pub returned_count: usize,
    pub intent: String,
    pub intent_applied: String,
    pub strategy_template: String,
    pub strategy_template_applied: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardEvent {
    pub timestamp: String,
    pub operation: String,
    pub action: String,
    pub method: String,
    pub reason: String,
    pub target_id: Option<i64>,
    pub blocked: bool,
    pub degraded: bool,
    pub degrade_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupQueryEvent {
    pub timestamp: String,
    pub query_ms: f64,
    pub slow: bool,
    pub candidate_count: usize,
    pub memory_index_hit: bool,
    pub path_index_hit: bool,
    pub full_scan: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyAggregate {
    pub count: usize,
    pub average_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

fn aggregate_latencies(mut values: Vec<f64>) -> LatencyAggregate {
    if values.is_empty() {
        return LatencyAggregate::default();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = values.len();
    let sum: f64 = values.iter().sum();
    let p95_index = ((count as f64) * 0.95).ceil() as usize;
    let p95 = values[p95_index.saturating_sub(1).min(count - 1)];
    LatencyAggregate {
        count,
        average_ms: sum / count as f64,
        p95_ms: p95,
        max_ms: *values.last().unwrap(),
    }
}

fn top_degrade_reasons(all_reasons: impl Iterator<Item = Vec<String>>, top_n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for reasons in all_reasons {
        for r in reasons {
            *counts.entry(r).or_insert(0) += 1;
        }
    }
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    pairs.truncate(top_n);
    pairs
}

struct BoundedWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone + Serialize + for<'de> Deserialize<'de>> BoundedWindow<T> {
    fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, item: T) {
        self.items.push_back(item);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    fn load(&mut self, store: &Store, key: &str) {
        if let Ok(Some(raw)) = runtime_meta::get(store, key) {
            if let Ok(items) = serde_json::from_str::<Vec<T>>(&raw) {
                self.items = items.into();
            }
        }
    }

    fn persist(&self, store: &Store, key: &str) {
        if let Ok(json) = serde_json::to_string(&self.snapshot()) {
            let _ = runtime_meta::set(store, key, &json);
        }
    }
}

/// In-memory observability recorder, backed by `runtime_meta` for restart
/// continuity. One instance is shared across the process.
pub struct Observability {
    slow_query_threshold_ms: f64,
    search: Mutex<BoundedWindow<SearchEvent>>,
    guard: Mutex<BoundedWindow<GuardEvent>>,
    cleanup: Mutex<BoundedWindow<CleanupQueryEvent>>,
}

impl Default for Observability {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_QUERY_MS)
    }
}

impl Observability {
    pub fn new(slow_query_threshold_ms: f64) -> Self {
        Self {
            slow_query_threshold_ms,
            search: Mutex::new(BoundedWindow::new(SEARCH_WINDOW)),
            guard: Mutex::new(BoundedWindow::new(GUARD_WINDOW)),
            cleanup: Mutex::new(BoundedWindow::new(CLEANUP_WINDOW)),
        }
    }

    /// Restore windows from `runtime_meta`, if a prior snapshot exists.
    pub fn load(&self, store: &Store) {
        self.search.lock().load(store, SEARCH_EVENTS_KEY);
        self.guard.lock().load(store, GUARD_EVENTS_KEY);
        self.cleanup.lock().load(store, CLEANUP_EVENTS_KEY);
    }

    pub fn record_search(&self, store: &Store, event: SearchEvent) {
        let mut window = self.search.lock();
        window.push(event);
        window.persist(store, SEARCH_EVENTS_KEY);
    }

    pub fn record_guard(&self, store: &Store, event: GuardEvent) {
        let mut window = self.guard.lock();
        window.push(event);
        window.persist(store, GUARD_EVENTS_KEY);
    }

    pub fn record_cleanup_query(&self, store: &Store, mut event: CleanupQueryEvent) {
        event.slow = event.query_ms >= self.slow_query_threshold_ms;
        let mut window = self.cleanup.lock();
        window.push(event);
        window.persist(store, CLEANUP_EVENTS_KEY);
    }

    pub fn search_events(&self) -> Vec<SearchEvent> {
        self.search.lock().snapshot()
    }

    pub fn guard_events(&self) -> Vec<GuardEvent> {
        self.guard.lock().snapshot()
    }

    pub fn cleanup_events(&self) -> Vec<CleanupQueryEvent> {
        self.cleanup.lock().snapshot()
    }

    pub fn search_latency_aggregate(&self) -> LatencyAggregate {
        aggregate_latencies(self.search.lock().snapshot().iter().map(|e| e.latency_ms).collect())
    }

    pub fn cleanup_latency_aggregate(&self) -> LatencyAggregate {
        aggregate_latencies(self.cleanup.lock().snapshot().iter().map(|e| e.query_ms).collect())
    }

    pub fn top_search_degrade_reasons(&self, top_n: usize) -> Vec<(String, usize)> {
        top_degrade_reasons(self.search.lock().snapshot().into_iter().map(|e| e.degrade_reasons), top_n)
    }

    pub fn top_guard_degrade_reasons(&self, top_n: usize) -> Vec<(String, usize)> {
        top_degrade_reasons(self.guard.lock().snapshot().into_iter().map(|e| e.degrade_reasons), top_n)
    }

    pub fn guard_action_breakdown(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for e in self.guard.lock().snapshot() {
            *counts.entry(e.action).or_insert(0) += 1;
        }
        counts
    }

    pub fn search_mode_breakdown(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for e in self.search.lock().snapshot() {
            *counts.entry(e.mode_applied).or_insert(0) += 1;
        }
        counts
    }

    pub fn search_intent_breakdown(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for e in self.search.lock().snapshot() {
            *counts.entry(e.intent_applied).or_insert(0) += 1;
        }
        counts
    }

    pub fn degraded_search_ratio(&self) -> f64 {
        let events = self.search.lock().snapshot();
        if events.is_empty() {
            return 0.0;
        }
        events.iter().filter(|e| e.degraded).count() as f64 / events.len() as f64
    }

    pub fn slow_cleanup_query_ratio(&self) -> f64 {
        let events = self.cleanup.lock().snapshot();
        if events.is_empty() {
            return 0.0;
        }
        events.iter().filter(|e| e.slow).count() as f64 / events.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_search_event(latency_ms: f64, degraded: bool) -> SearchEvent {
        SearchEvent {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            mode_requested: "auto".to_string(),
            mode_applied: "hybrid".to_string(),
            latency_ms,
            degraded,
            degrade_reasons: if degraded { vec!["embedding_request_failed".to_string()] } else { vec![] },
            session_count: 0,
            global_count: 0,
            returned_count: 3,
            intent: "lookup".to_string(),
            intent_applied: "lookup".to_string(),
            strategy_template: "default".to_string(),
            strategy_template_applied: "default".to_string(),
        }
    }

    #[test]
    fn window_evicts_oldest_once_over_capacity() {
        let store = Store::open_in_memory().unwrap();
        let obs = Observability::default();
        for i in 0..(SEARCH_WINDOW + 10) {
            obs.record_search(&store, sample_search_event(i as f64, false));
        }
        assert_eq!(obs.search_events().len(), SEARCH_WINDOW);
    }

    #[test]
    fn persists_and_reloads_across_instances() {
        let store = Store::open_in_memory().unwrap();
        let obs = Observability::default();
        obs.record_search(&store, sample_search_event(10.0, false));

        let reloaded = Observability::default();
        reloaded.load(&store);
        assert_eq!(reloaded.search_events().len(), 1);
    }

    #[test]
    fn latency_aggregate_computes_average_and_max() {
        let store = Store::open_in_memory().unwrap();
        let obs = Observability::default();
        for v in [10.0, 20.0, 30.0] {
            obs.record_search(&store, sample_search_event(v, false));
        }
        let agg = obs.search_latency_aggregate();
        assert_eq!(agg.count, 3);
        assert!((agg.average_ms - 20.0).abs() < 1e-9);
        assert_eq!(agg.max_ms, 30.0);
    }

    #[test]
    fn cleanup_event_is_marked_slow_above_threshold() {
        let store = Store::open_in_memory().unwrap();
        let obs = Observability::new(100.0);
        obs.record_cleanup_query(
            &store,
            CleanupQueryEvent {
                timestamp: "t".into(),
                query_ms: 150.0,
                slow: false,
                candidate_count: 5,
                memory_index_hit: true,
                path_index_hit: true,
                full_scan: false,
                degraded: false,
            },
        );
        assert!(obs.cleanup_events()[0].slow);
    }

    #[test]
    fn top_degrade_reasons_ranks_by_frequency() {
        let store = Store::open_in_memory().unwrap();
        let obs = Observability::default();
        obs.record_search(&store, sample_search_event(1.0, true));
        obs.record_search(&store, sample_search_event(1.0, true));
        obs.record_search(&store, sample_search_event(1.0, false));
        let top = obs.top_search_degrade_reasons(5);
        assert_eq!(top[0], ("embedding_request_failed".to_string(), 2));
    }
}
