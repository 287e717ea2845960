//! Access reinforcement: every search hit nudges a memory's vitality score
//! upward, bounded by a cap, and bumps its access bookkeeping.

use crate::storage::{queries, Store};
use crate::types::MemoryId;

/// Per-hit vitality increment. Not exposed as an env key — see design notes
/// on why this stays a compiled-in constant rather than a tunable.
pub const DELTA_REINFORCE: f64 = 0.1;

/// Ceiling a memory's vitality score can reach through reinforcement alone.
pub const VITALITY_CAP: f64 = 2.0;

/// Reinforce every valid memory id in `ids`. IDs that are non-positive are
/// silently skipped (not an error — a caller-supplied result set may contain
/// noise); a per-id store failure is swallowed so a single bad write never
/// blocks reinforcement of the rest of the batch.
pub fn reinforce_results(store: &Store, ids: &[MemoryId]) {
    let now = chrono::Utc::now().to_rfc3339();
    for &id in ids {
        if id <= 0 {
            continue;
        }
        let _ = store.with_connection(|conn| {
            queries::reinforce_memory(conn, id, &now, DELTA_REINFORCE, VITALITY_CAP)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::create_memory;

    #[test]
    fn reinforcement_raises_vitality_and_access_count() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        reinforce_results(&store, &[created.id]);
        let m = store
            .with_connection(|c| queries::get_memory(c, created.id))
            .unwrap()
            .unwrap();
        assert_eq!(m.access_count, 1);
        assert!(m.vitality_score > 1.0);
        assert!(m.last_accessed_at.is_some());
    }

    #[test]
    fn reinforcement_respects_cap() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        for _ in 0..50 {
            reinforce_results(&store, &[created.id]);
        }
        let m = store
            .with_connection(|c| queries::get_memory(c, created.id))
            .unwrap()
            .unwrap();
        assert!(m.vitality_score <= VITALITY_CAP);
    }

    #[test]
    fn non_positive_ids_are_skipped_without_error() {
        let store = Store::open_in_memory().unwrap();
        reinforce_results(&store, &[0, -5]);
    }
}
