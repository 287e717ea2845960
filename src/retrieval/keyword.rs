//! Keyword candidate scoring: token-overlap relevance blended with recency
//! and priority boosts.
//!
//! Blend weights (0.70 text / 0.20 recency / 0.10 priority) mirror the ratio
//! observed in the session-cache search path of the original system; no
//! other blend was specified, so this is frozen here as the implementation
//! default rather than left to vary per call site.

use crate::types::{Memory, MemoryPath};

pub const TEXT_WEIGHT: f64 = 0.70;
pub const RECENCY_WEIGHT: f64 = 0.20;
pub const PRIORITY_WEIGHT: f64 = 0.10;

/// Half-life, in days, for the recency component — a memory touched this
/// long ago scores 0.5 on the recency axis.
const RECENCY_HALF_LIFE_DAYS: f64 = 14.0;

/// Priority scores are clamped to this range before being normalized to [0, 1].
const PRIORITY_CLAMP: i32 = 10;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction of query tokens present in the document's token set.
fn text_score(query_tokens: &[String], content: &str) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens: std::collections::HashSet<String> = tokenize(content).into_iter().collect();
    let hits = query_tokens.iter().filter(|t| doc_tokens.contains(*t)).count();
    hits as f64 / query_tokens.len() as f64
}

/// Exponential decay from `created_at` to now; `now` and `created_at` are
/// ISO-8601 UTC strings.
fn recency_score(created_at: &str, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(created_at) else {
        return 0.0;
    };
    let age_days = (now - created.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86400.0;
    if age_days <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
}

fn priority_score(priority: i32) -> f64 {
    let clamped = priority.clamp(0, PRIORITY_CLAMP);
    clamped as f64 / PRIORITY_CLAMP as f64
}

#[derive(Debug, Clone)]
pub struct KeywordCandidate {
    pub path: MemoryPath,
    pub memory: Memory,
    pub score: f64,
}

/// Score a pool of (path, memory) rows against the query tokens, returning
/// only non-zero-text-score candidates sorted by descending blended score.
pub fn score_candidates(
    query_tokens: &[String],
    rows: Vec<(MemoryPath, Memory)>,
    now: chrono::DateTime<chrono::Utc>,
) -> Vec<KeywordCandidate> {
    let mut scored: Vec<KeywordCandidate> = rows
        .into_iter()
        .filter_map(|(path, memory)| {
            let text = text_score(query_tokens, &memory.content);
            if text <= 0.0 {
                return None;
            }
            let recency = recency_score(&memory.created_at, now);
            let priority = priority_score(memory.priority);
            let score = text * TEXT_WEIGHT + recency * RECENCY_WEIGHT + priority * PRIORITY_WEIGHT;
            Some(KeywordCandidate { path, memory, score })
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

pub fn tokenize_query(query: &str) -> Vec<String> {
    tokenize(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn memory(content: &str, priority: i32, created_at: &str) -> Memory {
        Memory {
            id: 1,
            content: content.to_string(),
            priority,
            disclosure: None,
            deprecated: false,
            migrated_to: None,
            created_at: created_at.to_string(),
            vitality_score: 1.0,
            last_accessed_at: None,
            access_count: 0,
        }
    }

    fn path(memory_id: i64) -> MemoryPath {
        MemoryPath {
            domain: "core".into(),
            path: "note".into(),
            memory_id,
            priority: 0,
        }
    }

    #[test]
    fn scores_zero_for_no_token_overlap() {
        let rows = vec![(path(1), memory("unrelated text", 0, "2020-01-01T00:00:00Z"))];
        let out = score_candidates(&["rust".to_string()], rows, Utc::now());
        assert!(out.is_empty());
    }

    #[test]
    fn higher_priority_and_recency_rank_above_lower() {
        let now = Utc::now();
        let recent = now.to_rfc3339();
        let old = (now - chrono::Duration::days(365)).to_rfc3339();
        let rows = vec![
            (path(1), memory("rust memory store", 0, &old)),
            (path(2), memory("rust memory store", 10, &recent)),
        ];
        let out = score_candidates(&["rust".to_string(), "memory".to_string()], rows, now);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].memory.id, 2);
    }

    #[test]
    fn tokenize_query_splits_on_punctuation() {
        assert_eq!(tokenize_query("rust, memory!"), vec!["rust", "memory"]);
    }
}
