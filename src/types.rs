//! Core data model for Stratum: memories, paths, gists, tags, and the small
//! persisted/ephemeral record types used by the job and cleanup subsystems.

use serde::{Deserialize, Serialize};

/// Unique identifier for a Memory version.
pub type MemoryId = i64;

/// A versioned unit of content, reachable through zero or more [`MemoryPath`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    pub priority: i32,
    pub disclosure: Option<String>,
    pub deprecated: bool,
    pub migrated_to: Option<MemoryId>,
    pub created_at: String,
    pub vitality_score: f64,
    pub last_accessed_at: Option<String>,
    pub access_count: i64,
}

/// A mutable addressable alias. `(domain, path)` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPath {
    pub domain: String,
    pub path: String,
    pub memory_id: MemoryId,
    pub priority: i32,
}

impl MemoryPath {
    /// The `domain://path` form used throughout the boundary APIs.
    pub fn uri(&self) -> String {
        format!("{}://{}", self.domain, self.path)
    }
}

/// Gist generation method, recorded for provenance and to protect
/// human/LLM-curated gists from being overwritten by sleep consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GistMethod {
    LlmGist,
    ExtractiveBullets,
    SentenceFallback,
    TruncateFallback,
    SleepFragmentRollup,
}

impl GistMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GistMethod::LlmGist => "llm_gist",
            GistMethod::ExtractiveBullets => "extractive_bullets",
            GistMethod::SentenceFallback => "sentence_fallback",
            GistMethod::TruncateFallback => "truncate_fallback",
            GistMethod::SleepFragmentRollup => "sleep_fragment_rollup",
        }
    }
}

impl std::str::FromStr for GistMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm_gist" => Ok(GistMethod::LlmGist),
            "extractive_bullets" => Ok(GistMethod::ExtractiveBullets),
            "sentence_fallback" => Ok(GistMethod::SentenceFallback),
            "truncate_fallback" => Ok(GistMethod::TruncateFallback),
            "sleep_fragment_rollup" => Ok(GistMethod::SleepFragmentRollup),
            other => Err(format!("unknown gist method: {other}")),
        }
    }
}

/// A short summary attached to a memory, unique on `(memory_id, source_content_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryGist {
    pub memory_id: MemoryId,
    pub gist_text: String,
    pub source_content_hash: String,
    pub gist_method: GistMethod,
    pub quality_score: f64,
    pub created_at: String,
}

/// A keyword-boosting tag attached to a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTag {
    pub memory_id: MemoryId,
    pub tag_type: String,
    pub tag_value: String,
}

/// A short content preview used by `get_children`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildPreview {
    pub path: String,
    pub domain: String,
    pub uri: String,
    pub memory_id: MemoryId,
    pub content_snippet: String,
    pub priority: i32,
    pub gist_text: Option<String>,
    pub gist_method: Option<String>,
}

/// Result of `create_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryResult {
    pub id: MemoryId,
    pub uri: String,
    pub index_targets: Vec<MemoryId>,
}

/// Outcome of `remove_path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovePathResult {
    pub descendants: Option<Vec<String>>,
    pub orphaned: Option<bool>,
}

/// Outcome of `update_memory`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryResult {
    pub new_memory_id: Option<MemoryId>,
}

/// Outcome of `permanently_delete_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMemoryResult {
    pub deleted: bool,
}

fn content_snippet(content: &str, max_chars: usize) -> String {
    let mut snippet: String = content.chars().take(max_chars).collect();
    if content.chars().count() > max_chars {
        snippet.push('…');
    }
    snippet
}

/// Max characters shown in a [`ChildPreview`] content snippet.
pub const CHILD_SNIPPET_CHARS: usize = 160;

impl ChildPreview {
    pub fn from_parts(p: &MemoryPath, m: &Memory, gist: Option<&MemoryGist>) -> Self {
        ChildPreview {
            path: p.path.clone(),
            domain: p.domain.clone(),
            uri: p.uri(),
            memory_id: m.id,
            content_snippet: content_snippet(&m.content, CHILD_SNIPPET_CHARS),
            priority: p.priority,
            gist_text: gist.map(|g| g.gist_text.clone()),
            gist_method: gist.map(|g| g.gist_method.as_str().to_string()),
        }
    }
}
