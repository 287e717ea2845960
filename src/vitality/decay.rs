//! Single-flight, once-per-UTC-day vitality decay.
//!
//! `vitality_score *= exp(-λ · days_since_last_access)` for every memory.
//! The coordinator is a mutex plus a last-success marker (persisted to
//! RuntimeMeta so a restart doesn't re-run decay twice in the same UTC day)
//! and a `check_interval_seconds` throttle that the forced path bypasses —
//! but the forced path still takes the mutex, so concurrent forced calls
//! serialize rather than double-apply.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::storage::{queries, runtime_meta, Store};

/// Per-day decay rate. Not specified upstream beyond "tunable"; frozen here
/// at a rate that halves a completely inactive memory's vitality in about
/// two weeks (`ln(2) / 14 ≈ 0.0495`).
pub const LAMBDA: f64 = 0.05;

const RUNTIME_META_KEY: &str = "vitality.decay.last_applied_date";

#[derive(Debug, Clone)]
pub struct DecayConfig {
    pub check_interval_seconds: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self { check_interval_seconds: 3600 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecayOutcome {
    pub applied: bool,
    pub reason: String,
    pub memories_touched: usize,
}

pub struct DecayCoordinator {
    config: DecayConfig,
    state: Mutex<State>,
}

struct State {
    last_applied_utc_date: Option<NaiveDate>,
    last_check: Option<Instant>,
}

impl DecayCoordinator {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State { last_applied_utc_date: None, last_check: None }),
        }
    }

    pub fn apply(&self, store: &Store, force: bool, reason: &str) -> DecayOutcome {
        let mut state = self.state.lock();

        if !force {
            if let Some(last_check) = state.last_check {
                if last_check.elapsed() < Duration::from_secs(self.config.check_interval_seconds) {
                    return DecayOutcome {
                        applied: false,
                        reason: "check_interval_not_elapsed".to_string(),
                        memories_touched: 0,
                    };
                }
            }
        }
        state.last_check = Some(Instant::now());

        let today = Utc::now().date_naive();
        let already_applied_today = state.last_applied_utc_date == Some(today)
            || runtime_meta::get(store, RUNTIME_META_KEY)
                .ok()
                .flatten()
                .and_then(|s| s.parse::<NaiveDate>().ok())
                == Some(today);

        if already_applied_today && !force {
            return DecayOutcome {
                applied: false,
                reason: "already_applied_today".to_string(),
                memories_touched: 0,
            };
        }

        let touched = apply_vitality_decay(store).unwrap_or(0);
        state.last_applied_utc_date = Some(today);
        let _ = runtime_meta::set(store, RUNTIME_META_KEY, &today.to_string());

        DecayOutcome {
            applied: true,
            reason: reason.to_string(),
            memories_touched: touched,
        }
    }
}

/// Apply one decay pass over every memory, returning the count touched.
pub fn apply_vitality_decay(store: &Store) -> crate::error::Result<usize> {
    let now = Utc::now();
    store.with_connection(|conn| {
        let rows = queries::all_memory_ids_with_vitality(conn)?;
        let mut touched = 0;
        for (id, vitality, last_accessed_at) in rows {
            let days = last_accessed_at
                .as_deref()
                .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| (now - ts.with_timezone(&Utc)).num_seconds() as f64 / 86400.0)
                .unwrap_or(0.0)
                .max(0.0);
            let decayed = vitality * (-LAMBDA * days).exp();
            if (decayed - vitality).abs() > f64::EPSILON {
                queries::set_vitality_score(conn, id, decayed)?;
                touched += 1;
            }
        }
        Ok(touched)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::create_memory;

    #[test]
    fn second_call_same_day_is_a_noop_without_force() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        let coordinator = DecayCoordinator::new(DecayConfig { check_interval_seconds: 0 });

        let first = coordinator.apply(&store, false, "test");
        assert!(first.applied);
        let second = coordinator.apply(&store, false, "test");
        assert!(!second.applied);
        assert_eq!(second.reason, "already_applied_today");
    }

    #[test]
    fn forced_call_bypasses_daily_guard() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        let coordinator = DecayCoordinator::new(DecayConfig { check_interval_seconds: 0 });

        coordinator.apply(&store, false, "test");
        let forced = coordinator.apply(&store, true, "test.force");
        assert!(forced.applied);
    }

    #[test]
    fn decay_reduces_vitality_for_inactive_memory() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        let old_ts = (Utc::now() - chrono::Duration::days(30)).to_rfc3339();
        store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE memories SET last_accessed_at = ?2 WHERE id = ?1",
                    rusqlite::params![created.id, old_ts],
                )?;
                Ok(())
            })
            .unwrap();

        apply_vitality_decay(&store).unwrap();
        let m = store
            .with_connection(|c| queries::get_memory(c, created.id))
            .unwrap()
            .unwrap();
        assert!(m.vitality_score < 1.0);
    }
}
