//! Sleep-time consolidation: the periodic maintenance job run on the index
//! worker (as `TaskType::SleepConsolidation`) that scans for orphans,
//! deduplicates them, rolls recent fragments into gists, and always
//! finishes with an index rebuild.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::concurrency::{EnqueueOutcome, IndexWorker, TaskType};
use crate::error::Result;
use crate::llm::LlmProvider;
use crate::memory::permanently_delete_memory;
use crate::storage::{queries, Store};
use crate::types::{GistMethod, Memory, MemoryId};

const GIST_SYSTEM_PROMPT: &str = "You write a one-paragraph gist summarizing the fragments below, \
in plain prose, under 400 characters. Respond with only the gist text, no preamble.";

/// Asks the configured gist LLM for a summary of the fragment group. Returns
/// `None` on any failure or empty response — the caller falls back to the
/// extractive-bullets method either way, same contract as the guard arbiter.
fn llm_gist(llm: &dyn LlmProvider, fragments: &[String]) -> Option<String> {
    let user_prompt = fragments
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {f}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let gist = llm.complete(GIST_SYSTEM_PROMPT, &user_prompt).ok()?;
    let gist = gist.trim().to_string();
    if gist.is_empty() {
        None
    } else {
        Some(gist)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsolidationConfig {
    pub dedup_apply_enabled: bool,
    pub fragment_rollup_apply_enabled: bool,
    pub recent_scan_limit: i64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self { dedup_apply_enabled: false, fragment_rollup_apply_enabled: false, recent_scan_limit: 200 }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrphanScanReport {
    pub orphan_count: usize,
    pub deprecated_count: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DedupReport {
    pub groups_considered: usize,
    pub deleted: Vec<MemoryId>,
    pub kept: Vec<MemoryId>,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RollupReport {
    pub groups_considered: usize,
    pub gists_written: Vec<MemoryId>,
    pub skipped_existing_gist: Vec<MemoryId>,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsolidationReport {
    pub orphan_scan: OrphanScanReport,
    pub dedup: DedupReport,
    pub rollup: RollupReport,
    pub cleanup_preview_count: usize,
    pub index_rebuild_job_id: Option<String>,
    pub degraded: bool,
    pub degrade_reasons: Vec<String>,
}

fn content_fingerprint(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn orphan_scan(store: &Store) -> Result<(OrphanScanReport, Vec<Memory>)> {
    let orphans = store.with_connection(queries::scan_orphans)?;
    let deprecated_count = orphans.iter().filter(|m| m.deprecated).count();
    let report = OrphanScanReport { orphan_count: orphans.len(), deprecated_count };
    Ok((report, orphans))
}

fn orphan_dedup(store: &Store, orphans: &[Memory], apply: bool) -> DedupReport {
    let mut groups: HashMap<String, Vec<&Memory>> = HashMap::new();
    for m in orphans {
        groups.entry(content_fingerprint(&m.content)).or_default().push(m);
    }

    let mut report = DedupReport { applied: apply, ..Default::default() };
    for (_, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        report.groups_considered += 1;

        // Keep the non-deprecated, newest memory; tie-break by highest id.
        members.sort_by(|a, b| {
            a.deprecated
                .cmp(&b.deprecated)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        let (keep, rest) = members.split_first().expect("len >= 2 checked above");
        report.kept.push(keep.id);

        if !apply {
            continue;
        }
        for m in rest {
            if permanently_delete_memory(store, m.id, true, None).is_ok() {
                report.deleted.push(m.id);
            }
        }
    }
    report
}

fn fragment_rollup(store: &Store, config: &ConsolidationConfig, gist_llm: Option<&dyn LlmProvider>) -> Result<RollupReport> {
    let recent = store.with_connection(|conn| queries::recent_memories_by_parent(conn, config.recent_scan_limit))?;

    let mut groups: HashMap<(String, String), Vec<(String, Memory)>> = HashMap::new();
    for (path, memory) in recent {
        if memory.content.trim().is_empty() {
            continue;
        }
        let parent = path.path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default();
        groups.entry((path.domain.clone(), parent)).or_default().push((path.path.clone(), memory));
    }

    let mut report = RollupReport { applied: config.fragment_rollup_apply_enabled, ..Default::default() };
    for (_, mut members) in groups {
        if members.len() < 3 {
            continue;
        }
        report.groups_considered += 1;
        if !config.fragment_rollup_apply_enabled {
            continue;
        }

        members.sort_by(|a, b| a.0.cmp(&b.0));
        let (anchor_path, anchor_memory) = &members[0];
        let _ = anchor_path;

        let existing = store.with_connection(|conn| queries::latest_gist(conn, anchor_memory.id))?;
        if let Some(gist) = &existing {
            let written_by_rollup =
                matches!(gist.gist_method, GistMethod::SleepFragmentRollup | GistMethod::LlmGist);
            if !written_by_rollup {
                report.skipped_existing_gist.push(anchor_memory.id);
                continue;
            }
        }

        let extractive: String = members
            .iter()
            .take(6)
            .map(|(_, m)| format!("- {}", content_snippet(&m.content, 120)))
            .collect::<Vec<_>>()
            .join("\n");

        let (gist_text, gist_method, confidence) = match gist_llm
            .and_then(|llm| llm_gist(llm, &members.iter().map(|(_, m)| m.content.clone()).collect::<Vec<_>>()))
        {
            Some(text) => (text, GistMethod::LlmGist, 0.8),
            None => (extractive, GistMethod::SleepFragmentRollup, 0.5),
        };

        let source_hash = content_fingerprint(&members.iter().map(|(_, m)| m.content.clone()).collect::<Vec<_>>().join("\u{1f}"));
        store.with_connection(|conn| {
            queries::upsert_memory_gist(conn, anchor_memory.id, &gist_text, &source_hash, gist_method, confidence)
        })?;
        report.gists_written.push(anchor_memory.id);
    }
    Ok(report)
}

fn content_snippet(content: &str, max_chars: usize) -> String {
    let mut snippet: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        snippet.push('…');
    }
    snippet
}

/// Run a full consolidation pass. Every step is fault-tolerant: a failure in
/// one step appends a degrade reason and the job still reports success
/// overall, matching the "always complete" contract for this background job.
pub fn run_consolidation(
    store: &Store,
    index_worker: Option<&IndexWorker>,
    config: &ConsolidationConfig,
    gist_llm: Option<&dyn LlmProvider>,
    trigger_reason: &str,
) -> ConsolidationReport {
    let mut report = ConsolidationReport::default();

    match orphan_scan(store) {
        Ok((scan, orphans)) => {
            report.orphan_scan = scan;
            report.dedup = orphan_dedup(store, &orphans, config.dedup_apply_enabled);
        }
        Err(e) => {
            report.degraded = true;
            report.degrade_reasons.push(format!("orphan_scan_failed:{e}"));
        }
    }

    match fragment_rollup(store, config, gist_llm) {
        Ok(r) => report.rollup = r,
        Err(e) => {
            report.degraded = true;
            report.degrade_reasons.push(format!("fragment_rollup_failed:{e}"));
        }
    }

    match crate::vitality::cleanup_candidates(store, 0.2, 30, None, None, 500) {
        Ok(candidates) => report.cleanup_preview_count = candidates.len(),
        Err(e) => {
            report.degraded = true;
            report.degrade_reasons.push(format!("cleanup_preview_failed:{e}"));
        }
    }

    if let Some(worker) = index_worker {
        let reason = format!("sleep_consolidation:{trigger_reason}");
        match worker.enqueue(TaskType::RebuildIndex, None, &reason) {
            EnqueueOutcome::Queued { job_id } | EnqueueOutcome::Deduped { job_id } => {
                report.index_rebuild_job_id = Some(job_id);
            }
            EnqueueOutcome::Dropped { reason } => {
                report.degraded = true;
                report.degrade_reasons.push(format!("index_rebuild_not_queued:{reason}"));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{create_memory, remove_path};

    #[test]
    fn orphan_dedup_keeps_newest_non_deprecated() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "duplicate text", 0, "a", "core").unwrap();
        create_memory(&store, "", "duplicate text", 0, "b", "core").unwrap();
        remove_path(&store, "a", "core").unwrap();
        remove_path(&store, "b", "core").unwrap();

        let (_, orphans) = orphan_scan(&store).unwrap();
        let report = orphan_dedup(&store, &orphans, true);
        assert_eq!(report.groups_considered, 1);
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.kept.len(), 1);
    }

    #[test]
    fn orphan_dedup_preview_only_when_apply_disabled() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "duplicate text", 0, "a", "core").unwrap();
        create_memory(&store, "", "duplicate text", 0, "b", "core").unwrap();
        remove_path(&store, "a", "core").unwrap();
        remove_path(&store, "b", "core").unwrap();

        let (_, orphans) = orphan_scan(&store).unwrap();
        let report = orphan_dedup(&store, &orphans, false);
        assert_eq!(report.groups_considered, 1);
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn fragment_rollup_skips_groups_under_three() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "proj", "note one", 0, "a", "core").unwrap();
        create_memory(&store, "proj", "note two", 0, "b", "core").unwrap();
        let config = ConsolidationConfig { fragment_rollup_apply_enabled: true, ..Default::default() };
        let report = fragment_rollup(&store, &config, None).unwrap();
        assert_eq!(report.groups_considered, 0);
    }

    #[test]
    fn fragment_rollup_writes_gist_for_group_of_three() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "proj", "note one", 0, "a", "core").unwrap();
        create_memory(&store, "proj", "note two", 0, "b", "core").unwrap();
        create_memory(&store, "proj", "note three", 0, "c", "core").unwrap();
        let config = ConsolidationConfig { fragment_rollup_apply_enabled: true, ..Default::default() };
        let report = fragment_rollup(&store, &config, None).unwrap();
        assert_eq!(report.groups_considered, 1);
        assert_eq!(report.gists_written.len(), 1);
    }

    #[test]
    fn fragment_rollup_never_overwrites_non_rollup_gist() {
        let store = Store::open_in_memory().unwrap();
        let a = create_memory(&store, "proj", "note one", 0, "a", "core").unwrap();
        create_memory(&store, "proj", "note two", 0, "b", "core").unwrap();
        create_memory(&store, "proj", "note three", 0, "c", "core").unwrap();
        store
            .with_connection(|conn| {
                queries::upsert_memory_gist(conn, a.id, "human written gist", "hash", GistMethod::ExtractiveBullets, 0.9)
            })
            .unwrap();

        let config = ConsolidationConfig { fragment_rollup_apply_enabled: true, ..Default::default() };
        let report = fragment_rollup(&store, &config, None).unwrap();
        assert_eq!(report.groups_considered, 1);
        assert!(report.gists_written.is_empty());
        assert_eq!(report.skipped_existing_gist, vec![a.id]);
    }

    #[test]
    fn run_consolidation_always_reports_even_with_no_worker() {
        let store = Store::open_in_memory().unwrap();
        let report = run_consolidation(&store, None, &ConsolidationConfig::default(), None, "scheduled");
        assert_eq!(report.orphan_scan.orphan_count, 0);
        assert!(report.index_rebuild_job_id.is_none());
    }

    #[test]
    fn run_consolidation_enqueues_index_rebuild_last() {
        let store = Store::open_in_memory().unwrap();
        let worker = IndexWorker::new(10, 30);
        let report = run_consolidation(&store, Some(&worker), &ConsolidationConfig::default(), None, "scheduled");
        assert!(report.index_rebuild_job_id.is_some());
    }

    struct FakeLlm(&'static str);
    impl LlmProvider for FakeLlm {
        fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn fragment_rollup_uses_llm_gist_when_configured() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "proj", "note one", 0, "a", "core").unwrap();
        create_memory(&store, "proj", "note two", 0, "b", "core").unwrap();
        create_memory(&store, "proj", "note three", 0, "c", "core").unwrap();
        let config = ConsolidationConfig { fragment_rollup_apply_enabled: true, ..Default::default() };
        let llm = FakeLlm("these three notes describe the same project thread");

        let report = fragment_rollup(&store, &config, Some(&llm)).unwrap();
        assert_eq!(report.gists_written.len(), 1);
        let gist = store.with_connection(|conn| queries::latest_gist(conn, report.gists_written[0])).unwrap().unwrap();
        assert_eq!(gist.gist_method, GistMethod::LlmGist);
        assert_eq!(gist.gist_text, "these three notes describe the same project thread");
    }

    #[test]
    fn fragment_rollup_falls_back_to_extractive_when_llm_errors() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "proj", "note one", 0, "a", "core").unwrap();
        create_memory(&store, "proj", "note two", 0, "b", "core").unwrap();
        create_memory(&store, "proj", "note three", 0, "c", "core").unwrap();
        let config = ConsolidationConfig { fragment_rollup_apply_enabled: true, ..Default::default() };

        struct FailingLlm;
        impl LlmProvider for FailingLlm {
            fn complete(&self, _system: &str, _user: &str) -> Result<String> {
                Err(crate::error::StratumError::Internal("down".to_string()))
            }
        }

        let report = fragment_rollup(&store, &config, Some(&FailingLlm)).unwrap();
        assert_eq!(report.gists_written.len(), 1);
        let gist = store.with_connection(|conn| queries::latest_gist(conn, report.gists_written[0])).unwrap().unwrap();
        assert_eq!(gist.gist_method, GistMethod::SleepFragmentRollup);
    }
}
