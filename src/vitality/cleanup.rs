//! Two-phase, human-approvable cleanup: `prepare` stages a set of
//! state-hash-checked selections behind a random token and confirmation
//! phrase; `confirm` atomically consumes it.

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Result, StratumError};
use crate::memory::{permanently_delete_memory, state_hash};
use crate::storage::{queries, Store};
use crate::types::MemoryId;

#[derive(Debug, Clone)]
pub struct Selection {
    pub memory_id: MemoryId,
    pub state_hash: String,
}

#[derive(Debug, Clone)]
pub struct CleanupReview {
    pub review_id: String,
    pub token: String,
    pub action: String,
    pub selections: Vec<Selection>,
    pub reviewer: String,
    pub phrase: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupPrepareOutcome {
    pub review_id: String,
    pub token: String,
    pub confirmation_phrase: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupConfirmOutcome {
    pub deleted: Vec<MemoryId>,
    pub kept: Vec<MemoryId>,
    pub skipped: Vec<ConfirmItemOutcome>,
    pub errors: Vec<ConfirmItemOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmItemOutcome {
    pub memory_id: MemoryId,
    pub reason: String,
}

/// In-memory coordinator for pending reviews: bounded count, TTL eviction.
pub struct ReviewCoordinator {
    ttl: Duration,
    max_pending: usize,
    reviews: Mutex<HashMap<String, CleanupReview>>,
}

impl ReviewCoordinator {
    pub fn new(ttl: Duration, max_pending: usize) -> Self {
        Self { ttl, max_pending, reviews: Mutex::new(HashMap::new()) }
    }

    fn evict_expired(&self, reviews: &mut HashMap<String, CleanupReview>) {
        let now = Instant::now();
        reviews.retain(|_, r| r.expires_at > now);
    }

    pub fn stage(&self, review: CleanupReview) -> Result<()> {
        let mut reviews = self.reviews.lock();
        self.evict_expired(&mut reviews);
        if reviews.len() >= self.max_pending {
            return Err(StratumError::QueueFull);
        }
        reviews.insert(review.review_id.clone(), review);
        Ok(())
    }

    pub fn take(&self, review_id: &str) -> Option<CleanupReview> {
        let mut reviews = self.reviews.lock();
        self.evict_expired(&mut reviews);
        reviews.remove(review_id)
    }

    pub fn put_back(&self, review: CleanupReview) {
        self.reviews.lock().insert(review.review_id.clone(), review);
    }
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..24).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect()
}

fn random_review_id() -> String {
    format!("rev-{}", uuid::Uuid::new_v4())
}

/// Re-fetch current state for every requested selection and compare against
/// the caller-supplied `state_hash`. Any mismatch is reported wholesale
/// rather than partially staging the review.
pub fn prepare_cleanup(
    store: &Store,
    coordinator: &ReviewCoordinator,
    action: &str,
    selections: Vec<Selection>,
    reviewer: &str,
) -> Result<CleanupPrepareOutcome> {
    let mut missing_ids = Vec::new();
    let mut stale_ids = Vec::new();

    for sel in &selections {
        store.with_connection(|conn| {
            match queries::get_memory(conn, sel.memory_id)? {
                None => missing_ids.push(sel.memory_id),
                Some(memory) => {
                    let paths = queries::paths_for_memory(conn, sel.memory_id)?;
                    let current = state_hash(&memory, &paths);
                    if current != sel.state_hash {
                        stale_ids.push(sel.memory_id);
                    }
                }
            }
            Ok(())
        })?;
    }

    if !missing_ids.is_empty() || !stale_ids.is_empty() {
        return Err(StratumError::Conflict(format!(
            "missing_ids={missing_ids:?} stale_ids={stale_ids:?}"
        )));
    }

    let review_id = random_review_id();
    let token = random_token();
    let phrase = format!("CONFIRM {} {}", action.to_uppercase(), selections.len());

    let count = selections.len();
    let review = CleanupReview {
        review_id: review_id.clone(),
        token: token.clone(),
        action: action.to_string(),
        selections,
        reviewer: reviewer.to_string(),
        phrase: phrase.clone(),
        expires_at: Instant::now() + coordinator.ttl,
    };
    coordinator.stage(review)?;

    Ok(CleanupPrepareOutcome { review_id, token, confirmation_phrase: phrase, count })
}

pub fn confirm_cleanup(
    store: &Store,
    coordinator: &ReviewCoordinator,
    review_id: &str,
    token: &str,
    confirmation_phrase: &str,
) -> Result<CleanupConfirmOutcome> {
    let review = coordinator
        .take(review_id)
        .ok_or_else(|| StratumError::JobNotFound(review_id.to_string()))?;

    if review.token != token || review.phrase != confirmation_phrase {
        coordinator.put_back(review);
        return Err(StratumError::Validation("token or confirmation phrase mismatch".into()));
    }

    let mut outcome = CleanupConfirmOutcome::default();
    for sel in &review.selections {
        let current = store.with_connection(|conn| {
            let memory = queries::get_memory(conn, sel.memory_id)?;
            let paths = memory
                .as_ref()
                .map(|m| queries::paths_for_memory(conn, m.id))
                .transpose()?
                .unwrap_or_default();
            Ok(memory.map(|m| (m, paths)))
        });

        let Ok(Some((memory, paths))) = current else {
            outcome.errors.push(ConfirmItemOutcome {
                memory_id: sel.memory_id,
                reason: "memory_missing".to_string(),
            });
            continue;
        };

        let actual_hash = state_hash(&memory, &paths);
        if actual_hash != sel.state_hash {
            outcome.skipped.push(ConfirmItemOutcome {
                memory_id: sel.memory_id,
                reason: "stale_state".to_string(),
            });
            continue;
        }

        if review.action != "delete" {
            outcome.kept.push(sel.memory_id);
            continue;
        }

        if !paths.is_empty() {
            outcome.skipped.push(ConfirmItemOutcome {
                memory_id: sel.memory_id,
                reason: "active_paths".to_string(),
            });
            continue;
        }

        match permanently_delete_memory(store, sel.memory_id, true, Some(&sel.state_hash)) {
            Ok(_) => outcome.deleted.push(sel.memory_id),
            Err(e) => outcome.errors.push(ConfirmItemOutcome {
                memory_id: sel.memory_id,
                reason: e.to_string(),
            }),
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{create_memory, remove_path};

    #[test]
    fn prepare_rejects_stale_state_hash() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        let coordinator = ReviewCoordinator::new(Duration::from_secs(60), 10);

        let selections = vec![Selection { memory_id: created.id, state_hash: "bogus".into() }];
        let err = prepare_cleanup(&store, &coordinator, "delete", selections, "alice").unwrap_err();
        assert!(matches!(err, StratumError::Conflict(_)));
    }

    #[test]
    fn prepare_then_confirm_deletes_orphan() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        remove_path(&store, "note", "core").unwrap();

        let current_hash = store
            .with_connection(|conn| {
                let memory = queries::get_memory(conn, created.id)?.unwrap();
                let paths = queries::paths_for_memory(conn, created.id)?;
                Ok(state_hash(&memory, &paths))
            })
            .unwrap();

        let coordinator = ReviewCoordinator::new(Duration::from_secs(60), 10);
        let selections = vec![Selection { memory_id: created.id, state_hash: current_hash }];
        let prepared = prepare_cleanup(&store, &coordinator, "delete", selections, "alice").unwrap();

        let confirmed = confirm_cleanup(
            &store,
            &coordinator,
            &prepared.review_id,
            &prepared.token,
            &prepared.confirmation_phrase,
        )
        .unwrap();

        assert_eq!(confirmed.deleted, vec![created.id]);
    }

    #[test]
    fn confirm_rejects_wrong_token() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "hello", 0, "note", "core").unwrap();
        remove_path(&store, "note", "core").unwrap();
        let current_hash = store
            .with_connection(|conn| {
                let memory = queries::get_memory(conn, created.id)?.unwrap();
                let paths = queries::paths_for_memory(conn, created.id)?;
                Ok(state_hash(&memory, &paths))
            })
            .unwrap();
        let coordinator = ReviewCoordinator::new(Duration::from_secs(60), 10);
        let selections = vec![Selection { memory_id: created.id, state_hash: current_hash }];
        let prepared = prepare_cleanup(&store, &coordinator, "delete", selections, "alice").unwrap();

        let err = confirm_cleanup(&store, &coordinator, &prepared.review_id, "wrong-token", &prepared.confirmation_phrase)
            .unwrap_err();
        assert!(matches!(err, StratumError::Validation(_)));
    }
}
