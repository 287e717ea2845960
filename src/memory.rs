//! The versioned memory model and addressing engine: URI resolution,
//! aliasing, content-change versioning, and state-hash optimistic locking.

use sha2::{Digest, Sha256};

use crate::error::{Result, StratumError};
use crate::storage::{queries, Store};
use crate::types::{
    ChildPreview, CreateMemoryResult, DeleteMemoryResult, Memory, MemoryId, MemoryPath,
    RemovePathResult, UpdateMemoryResult,
};

/// Join `parent_path` and `title` into a full path, per the root-vs-nested
/// rule in the lifecycle section: `title` alone at root, `parent/title`
/// otherwise.
pub fn join_path(parent_path: &str, title: &str) -> String {
    let parent = parent_path.trim_matches('/');
    let title = title.trim_matches('/');
    if parent.is_empty() {
        title.to_string()
    } else {
        format!("{parent}/{title}")
    }
}

/// Stable digest over the cleanup-relevant fields of a memory plus its
/// paths. Bucketed so that sub-minute clock drift and vitality noise beyond
/// two decimal places do not change the hash (spec invariant 6).
pub fn state_hash(memory: &Memory, paths: &[MemoryPath]) -> String {
    let vitality_bucket = (memory.vitality_score * 100.0).round() as i64;
    let last_accessed_bucket = memory
        .last_accessed_at
        .as_deref()
        .map(minute_bucket)
        .unwrap_or_default();

    let mut sorted_paths: Vec<String> = paths.iter().map(|p| p.uri()).collect();
    sorted_paths.sort();

    let mut hasher = Sha256::new();
    hasher.update(memory.id.to_le_bytes());
    hasher.update([memory.deprecated as u8]);
    hasher.update(memory.migrated_to.unwrap_or(0).to_le_bytes());
    hasher.update(vitality_bucket.to_le_bytes());
    hasher.update(memory.access_count.to_le_bytes());
    hasher.update(last_accessed_bucket.as_bytes());
    hasher.update(sorted_paths.join("\u{1f}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate an ISO-8601 `YYYY-MM-DDTHH:MM` timestamp to minute resolution.
fn minute_bucket(ts: &str) -> String {
    ts.get(0..16).unwrap_or(ts).to_string()
}

pub fn create_memory(
    store: &Store,
    parent_path: &str,
    content: &str,
    priority: i32,
    title: &str,
    domain: &str,
) -> Result<CreateMemoryResult> {
    create_memory_with_disclosure(store, parent_path, content, priority, title, domain, None)
}

pub fn create_memory_with_disclosure(
    store: &Store,
    parent_path: &str,
    content: &str,
    priority: i32,
    title: &str,
    domain: &str,
    disclosure: Option<&str>,
) -> Result<CreateMemoryResult> {
    if content.trim().is_empty() {
        return Err(StratumError::Validation("content must not be empty".into()));
    }
    let full_path = join_path(parent_path, title);
    if full_path.is_empty() {
        return Err(StratumError::Validation("title must not be empty".into()));
    }

    store.session(|tx| {
        if queries::get_path(tx, domain, &full_path)?.is_some() {
            return Err(StratumError::Conflict(format!(
                "{domain}://{full_path} already exists"
            )));
        }
        let id = queries::insert_memory(tx, content, priority, disclosure)?;
        queries::insert_path(tx, domain, &full_path, id, priority)?;
        Ok(CreateMemoryResult {
            id,
            uri: format!("{domain}://{full_path}"),
            index_targets: vec![id],
        })
    })
}

pub fn get_memory_by_path(store: &Store, path: &str, domain: &str) -> Result<Option<Memory>> {
    store.with_connection(|conn| {
        let Some(p) = queries::get_path(conn, domain, path)? else {
            return Ok(None);
        };
        queries::get_memory(conn, p.memory_id)
    })
}

/// Children of `memory_id` (or the virtual root when `None`), scoped by
/// `domain` when given. A memory with several aliased paths contributes
/// children from every alias path that falls within the requested domain.
pub fn get_children(
    store: &Store,
    memory_id: Option<MemoryId>,
    domain: Option<&str>,
) -> Result<Vec<ChildPreview>> {
    store.with_connection(|conn| {
        let child_paths = match memory_id {
            None => queries::root_paths(conn, domain)?,
            Some(id) => {
                let mut all = Vec::new();
                for p in queries::paths_for_memory(conn, id)? {
                    if domain.is_some_and(|d| d != p.domain) {
                        continue;
                    }
                    all.extend(queries::child_paths(conn, &p.domain, &p.path)?);
                }
                all
            }
        };

        let mut out = Vec::with_capacity(child_paths.len());
        for p in child_paths {
            let Some(m) = queries::get_memory(conn, p.memory_id)? else {
                continue;
            };
            let gist = queries::latest_gist(conn, m.id)?;
            out.push(ChildPreview::from_parts(&p, &m, gist.as_ref()));
        }
        Ok(out)
    })
}

pub fn add_path(
    store: &Store,
    new_path: &str,
    target_path: &str,
    new_domain: &str,
    target_domain: &str,
) -> Result<()> {
    store.session(|tx| {
        let target = queries::get_path(tx, target_domain, target_path)?.ok_or_else(|| {
            StratumError::PathNotFound {
                domain: target_domain.to_string(),
                path: target_path.to_string(),
            }
        })?;
        if queries::get_path(tx, new_domain, new_path)?.is_some() {
            return Err(StratumError::Conflict(format!(
                "{new_domain}://{new_path} already exists"
            )));
        }
        queries::insert_path(tx, new_domain, new_path, target.memory_id, target.priority)
    })
}

pub fn remove_path(store: &Store, path: &str, domain: &str) -> Result<RemovePathResult> {
    store.session(|tx| {
        let p = queries::get_path(tx, domain, path)?.ok_or_else(|| StratumError::PathNotFound {
            domain: domain.to_string(),
            path: path.to_string(),
        })?;

        let descendants = queries::descendant_paths(tx, domain, path)?;
        if !descendants.is_empty() {
            return Err(StratumError::Conflict(format!(
                "{domain}://{path} has {} child path(s)",
                descendants.len()
            )));
        }

        queries::delete_path(tx, domain, path)?;
        let remaining = queries::path_count_for_memory(tx, p.memory_id)?;
        Ok(RemovePathResult {
            descendants: None,
            orphaned: Some(remaining == 0),
        })
    })
}

/// Content-change triggers a new version: a fresh Memory row, every Path
/// repointed, and the predecessor marked deprecated with `migrated_to` set.
/// Metadata-only changes mutate the existing Memory in place.
pub fn update_memory(
    store: &Store,
    path: &str,
    domain: &str,
    content: Option<&str>,
    priority: Option<i32>,
    disclosure: Option<Option<&str>>,
) -> Result<UpdateMemoryResult> {
    store.session(|tx| {
        let p = queries::get_path(tx, domain, path)?.ok_or_else(|| StratumError::PathNotFound {
            domain: domain.to_string(),
            path: path.to_string(),
        })?;
        let current = queries::get_memory(tx, p.memory_id)?
            .ok_or(StratumError::MemoryNotFound(p.memory_id))?;

        let content_changed = content.is_some_and(|c| c != current.content);
        if !content_changed {
            queries::update_memory_metadata(tx, current.id, priority, disclosure)?;
            return Ok(UpdateMemoryResult { new_memory_id: None });
        }

        let new_content = content.unwrap();
        if new_content.trim().is_empty() {
            return Err(StratumError::Validation("content must not be empty".into()));
        }
        let new_priority = priority.unwrap_or(current.priority);
        let new_disclosure = disclosure
            .unwrap_or(current.disclosure.as_deref())
            .map(|s| s.to_string());

        let new_id = queries::insert_memory(
            tx,
            new_content,
            new_priority,
            new_disclosure.as_deref(),
        )?;
        queries::repoint_paths(tx, current.id, new_id)?;
        queries::mark_deprecated_migrated(tx, current.id, new_id)?;

        Ok(UpdateMemoryResult {
            new_memory_id: Some(new_id),
        })
    })
}

pub fn permanently_delete_memory(
    store: &Store,
    memory_id: MemoryId,
    require_orphan: bool,
    expected_state_hash: Option<&str>,
) -> Result<DeleteMemoryResult> {
    store.session(|tx| {
        let memory = queries::get_memory(tx, memory_id)?
            .ok_or(StratumError::MemoryNotFound(memory_id))?;
        let paths = queries::paths_for_memory(tx, memory_id)?;

        if require_orphan && !paths.is_empty() {
            return Err(StratumError::Conflict(format!(
                "memory {memory_id} still has {} path(s)",
                paths.len()
            )));
        }

        if let Some(expected) = expected_state_hash {
            let actual = state_hash(&memory, &paths);
            if actual != expected {
                return Err(StratumError::StaleState {
                    memory_id,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        queries::repair_migrated_to_chain(tx, memory_id, memory.migrated_to)?;
        queries::delete_memory(tx, memory_id)?;
        Ok(DeleteMemoryResult { deleted: true })
    })
}

/// Follow `migrated_to` from `start` to the currently-addressable memory, or
/// `None` if the lineage has been fully removed.
pub fn chase_migrated_to(store: &Store, start: MemoryId) -> Result<Option<MemoryId>> {
    store.with_connection(|conn| {
        let mut current = start;
        loop {
            match queries::get_memory(conn, current)? {
                None => return Ok(None),
                Some(m) => match m.migrated_to {
                    Some(next) => current = next,
                    None => return Ok(Some(current)),
                },
            }
        }
    })
}
