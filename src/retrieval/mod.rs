//! The tiered retrieval pipeline: preprocess → intent classification →
//! strategy templating → keyword/semantic/hybrid candidate generation →
//! optional rerank → merge/clip → reinforcement.

pub mod intent;
pub mod keyword;
pub mod preprocess;
pub mod rerank;
pub mod session_cache;

use serde::Serialize;
use std::collections::HashSet;

use crate::embedding::{cosine_similarity, FallbackEmbedder};
use crate::storage::{queries, Store};
use crate::vitality::reinforce_results;

pub use intent::Intent;
pub use preprocess::PreprocessedQuery;
pub use rerank::Reranker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub domain: Option<String>,
    pub path_prefix: Option<String>,
    pub max_priority: Option<i32>,
    pub updated_after: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub uri: String,
    pub domain: String,
    pub path: String,
    pub memory_id: i64,
    pub content_snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadata {
    pub intent: &'static str,
    pub strategy_template: &'static str,
    pub candidate_multiplier_applied: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: &'static str,
    pub results: Vec<SearchResultItem>,
    pub degraded: bool,
    pub degrade_reasons: Vec<String>,
    pub metadata: SearchMetadata,
}

pub const REASON_EMPTY_QUERY: &str = "empty_query";
pub const REASON_RERANKER_FAILED: &str = "reranker_request_failed";
pub const REASON_INTENT_CLASSIFICATION_UNAVAILABLE: &str = "intent_classification_unavailable";
pub const REASON_INTENT_PROFILE_NOT_SUPPORTED: &str = "intent_profile_not_supported";

/// Known intent-profile names the pipeline accepts. Anything else triggers
/// `intent_profile_not_supported` and the pipeline proceeds without applying
/// a profile-specific strategy.
const SUPPORTED_INTENT_PROFILES: &[&str] = &["default", "strict", "exploratory"];

#[allow(clippy::too_many_arguments)]
pub fn search_advanced(
    store: &Store,
    embedder: Option<&FallbackEmbedder>,
    reranker: Option<&dyn Reranker>,
    query: &str,
    mode: SearchMode,
    max_results: usize,
    candidate_multiplier: u32,
    filters: &SearchFilters,
    intent_profile: Option<&str>,
) -> SearchResponse {
    let mut degrade_reasons = Vec::new();

    if query.trim().is_empty() {
        degrade_reasons.push(REASON_EMPTY_QUERY.to_string());
        return SearchResponse {
            mode: mode.as_str(),
            results: Vec::new(),
            degraded: true,
            degrade_reasons,
            metadata: SearchMetadata {
                intent: Intent::Unknown.as_str(),
                strategy_template: "default",
                candidate_multiplier_applied: candidate_multiplier,
            },
        };
    }

    if let Some(profile) = intent_profile {
        if !SUPPORTED_INTENT_PROFILES.contains(&profile) {
            degrade_reasons.push(REASON_INTENT_PROFILE_NOT_SUPPORTED.to_string());
        }
    }

    let preprocessed = preprocess::preprocess_query(query);
    let intent = intent::classify_intent(&preprocessed.tokens);
    let (strategy_template, multiplier_override) = intent.strategy();
    let applied_multiplier = multiplier_override.unwrap_or(candidate_multiplier).max(1);
    let candidate_limit = (max_results as u32 * applied_multiplier).max(max_results as u32) as i64;

    let query_tokens = keyword::tokenize_query(&preprocessed.normalized);

    let rows = match store.with_connection(|conn| {
        queries::scan_addressable_memories(
            conn,
            filters.domain.as_deref(),
            filters.path_prefix.as_deref(),
            filters.max_priority,
            filters.updated_after.as_deref(),
        )
    }) {
        Ok(rows) => rows,
        Err(_) => {
            degrade_reasons.push(REASON_INTENT_CLASSIFICATION_UNAVAILABLE.to_string());
            Vec::new()
        }
    };

    let mut scored: Vec<(SearchResultItem, f64)> = Vec::new();

    if matches!(mode, SearchMode::Keyword | SearchMode::Hybrid) {
        let candidates = keyword::score_candidates(&query_tokens, rows.clone(), chrono::Utc::now());
        for c in candidates.into_iter().take(candidate_limit as usize) {
            scored.push((
                SearchResultItem {
                    uri: c.path.uri(),
                    domain: c.path.domain.clone(),
                    path: c.path.path.clone(),
                    memory_id: c.memory.id,
                    content_snippet: snippet(&c.memory.content),
                    score: c.score,
                },
                c.score,
            ));
        }
    }

    if matches!(mode, SearchMode::Semantic | SearchMode::Hybrid) {
        match embedder {
            None => degrade_reasons.push(crate::embedding::EMBEDDING_REQUEST_FAILED.to_string()),
            Some(embedder) => {
                let (query_vec, degrade) = embedder.embed_with_degrade(&preprocessed.normalized);
                if let Some(reason) = degrade {
                    degrade_reasons.push(reason.to_string());
                }
                for (path, memory) in rows.iter().take(candidate_limit as usize) {
                    let (doc_vec, doc_degrade) = embedder.embed_with_degrade(&memory.content);
                    if let Some(reason) = doc_degrade {
                        if !degrade_reasons.contains(&reason.to_string()) {
                            degrade_reasons.push(reason.to_string());
                        }
                    }
                    let sim = cosine_similarity(&query_vec, &doc_vec) as f64;
                    if sim <= 0.0 {
                        continue;
                    }
                    scored.push((
                        SearchResultItem {
                            uri: path.uri(),
                            domain: path.domain.clone(),
                            path: path.path.clone(),
                            memory_id: memory.id,
                            content_snippet: snippet(&memory.content),
                            score: sim,
                        },
                        sim,
                    ));
                }
            }
        }
    }

    // Merge & clip: dedupe by uri keeping the highest score, sort descending.
    let mut best: std::collections::HashMap<String, (SearchResultItem, f64)> = std::collections::HashMap::new();
    for (item, score) in scored {
        best.entry(item.uri.clone())
            .and_modify(|existing| {
                if score > existing.1 {
                    *existing = (item.clone(), score);
                }
            })
            .or_insert((item, score));
    }
    let mut merged: Vec<SearchResultItem> = best.into_values().map(|(item, _)| item).collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    if let Some(reranker) = reranker {
        let documents: Vec<String> = merged.iter().map(|r| r.content_snippet.clone()).collect();
        match reranker.rerank(&preprocessed.normalized, &documents) {
            Ok(order) => {
                let mut reordered = Vec::with_capacity(merged.len());
                let mut seen: HashSet<usize> = HashSet::new();
                for idx in order {
                    if idx < merged.len() && seen.insert(idx) {
                        reordered.push(merged[idx].clone());
                    }
                }
                for (i, item) in merged.into_iter().enumerate() {
                    if !seen.contains(&i) {
                        reordered.push(item);
                    }
                }
                merged = reordered;
            }
            Err(_) => degrade_reasons.push(REASON_RERANKER_FAILED.to_string()),
        }
    }

    merged.truncate(max_results);

    let ids: Vec<i64> = merged.iter().map(|r| r.memory_id).collect();
    reinforce_results(store, &ids);

    SearchResponse {
        mode: mode.as_str(),
        degraded: !degrade_reasons.is_empty(),
        degrade_reasons,
        results: merged,
        metadata: SearchMetadata {
            intent: intent.as_str(),
            strategy_template,
            candidate_multiplier_applied: applied_multiplier,
        },
    }
}

fn snippet(content: &str) -> String {
    const MAX_CHARS: usize = 200;
    let mut s: String = content.chars().take(MAX_CHARS).collect();
    if content.chars().count() > MAX_CHARS {
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::create_memory;

    #[test]
    fn empty_query_degrades_with_no_results() {
        let store = Store::open_in_memory().unwrap();
        let resp = search_advanced(
            &store,
            None,
            None,
            "   ",
            SearchMode::Keyword,
            10,
            1,
            &SearchFilters::default(),
            None,
        );
        assert!(resp.degraded);
        assert!(resp.degrade_reasons.contains(&REASON_EMPTY_QUERY.to_string()));
        assert!(resp.results.is_empty());
    }

    #[test]
    fn keyword_mode_finds_matching_memory() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "rust ownership and borrowing", 0, "note", "core").unwrap();
        create_memory(&store, "", "unrelated content about cooking", 0, "other", "core").unwrap();

        let resp = search_advanced(
            &store,
            None,
            None,
            "rust ownership",
            SearchMode::Keyword,
            10,
            1,
            &SearchFilters::default(),
            None,
        );
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].path, "note");
    }

    #[test]
    fn unsupported_intent_profile_is_flagged() {
        let store = Store::open_in_memory().unwrap();
        let resp = search_advanced(
            &store,
            None,
            None,
            "rust",
            SearchMode::Keyword,
            10,
            1,
            &SearchFilters::default(),
            Some("bogus-profile"),
        );
        assert!(resp
            .degrade_reasons
            .contains(&REASON_INTENT_PROFILE_NOT_SUPPORTED.to_string()));
    }

    #[test]
    fn semantic_mode_without_embedder_degrades() {
        let store = Store::open_in_memory().unwrap();
        create_memory(&store, "", "rust ownership", 0, "note", "core").unwrap();
        let resp = search_advanced(
            &store,
            None,
            None,
            "rust",
            SearchMode::Semantic,
            10,
            1,
            &SearchFilters::default(),
            None,
        );
        assert!(resp.degraded);
    }

    #[test]
    fn results_reinforce_returned_memories() {
        let store = Store::open_in_memory().unwrap();
        let created = create_memory(&store, "", "rust ownership and borrowing", 0, "note", "core").unwrap();
        search_advanced(
            &store,
            None,
            None,
            "rust ownership",
            SearchMode::Keyword,
            10,
            1,
            &SearchFilters::default(),
            None,
        );
        let m = store
            .with_connection(|c| queries::get_memory(c, created.id))
            .unwrap()
            .unwrap();
        assert_eq!(m.access_count, 1);
    }
}
