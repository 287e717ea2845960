//! Vitality scoring, decay, and the two-phase cleanup workflow.

mod cleanup;
mod decay;
mod reinforcement;

pub use cleanup::{
    confirm_cleanup, prepare_cleanup, CleanupConfirmOutcome, CleanupPrepareOutcome,
    CleanupReview, ConfirmItemOutcome, ReviewCoordinator, Selection,
};
pub use decay::{apply_vitality_decay, DecayConfig, DecayCoordinator, DecayOutcome};
pub use reinforcement::{reinforce_results, DELTA_REINFORCE, VITALITY_CAP};

use crate::error::Result;
use crate::storage::{queries, Store};
use crate::types::{MemoryId, MemoryPath};

/// Cleanup-candidate row handed to maintenance callers, carrying the
/// state-hash invariant used by `prepare`/`confirm`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CleanupCandidate {
    pub memory_id: MemoryId,
    pub uri: String,
    pub vitality_score: f64,
    pub inactive_days: i64,
    pub access_count: i64,
    pub path_count: usize,
    pub can_delete: bool,
    pub state_hash: String,
    pub reason_codes: Vec<String>,
}

/// `get_vitality_cleanup_candidates`: memories below `threshold`, inactive
/// for at least `inactive_days`, optionally scoped.
pub fn cleanup_candidates(
    store: &Store,
    threshold: f64,
    inactive_days: i64,
    domain: Option<&str>,
    path_prefix: Option<&str>,
    limit: i64,
) -> Result<Vec<CleanupCandidate>> {
    store.with_connection(|conn| {
        let rows = queries::cleanup_candidates(conn, threshold, inactive_days, domain, path_prefix, limit)?;
        Ok(rows
            .into_iter()
            .map(|row| to_candidate(&row.memory, &row.paths))
            .collect())
    })
}

fn to_candidate(memory: &crate::types::Memory, paths: &[MemoryPath]) -> CleanupCandidate {
    let inactive_days = memory
        .last_accessed_at
        .as_deref()
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| (chrono::Utc::now() - ts.with_timezone(&chrono::Utc)).num_days())
        .unwrap_or(i64::MAX);

    let mut reason_codes = Vec::new();
    if paths.is_empty() {
        reason_codes.push("orphaned".to_string());
    }
    reason_codes.push("low_vitality".to_string());

    let uri = paths.first().map(|p| p.uri()).unwrap_or_else(|| format!("memory://{}", memory.id));

    CleanupCandidate {
        memory_id: memory.id,
        uri,
        vitality_score: memory.vitality_score,
        inactive_days,
        access_count: memory.access_count,
        path_count: paths.len(),
        can_delete: paths.is_empty(),
        state_hash: crate::memory::state_hash(memory, paths),
        reason_codes,
    }
}
