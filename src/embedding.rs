//! Embedding providers for the semantic side of retrieval: a dependency-free
//! hash-based embedder for local/offline operation, and a remote API
//! embedder for production deployments.

use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{Result, StratumError};

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;
}

/// Cosine similarity between two equal-length vectors; 0.0 for mismatched
/// or zero-length/zero-norm inputs rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic, dependency-free embedding: each dimension is a hash of
/// the text salted by dimension index, scaled into [-1, 1]. Two calls with
/// the same text always produce the same vector; semantically unrelated to
/// content, but stable and cheap, matching the `embedding_fallback_hash`
/// degrade path used when no remote provider is configured.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let normalized = text.to_lowercase();
        let mut vector = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(i.to_le_bytes());
            hasher.update(normalized.as_bytes());
            let digest = hasher.finalize();
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
            let unit = (bucket as f64 / u32::MAX as f64) as f32;
            vector.push(unit * 2.0 - 1.0);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Remote embedding provider speaking the OpenAI-style `/embeddings`
/// contract. A base ending in `/embeddings` is normalized to its parent so
/// that appending `/embeddings` back on still yields the intended URL.
pub struct ApiEmbedder {
    client: reqwest::Client,
    api_base: String,
    model: String,
    dimensions: usize,
}

/// Strip a trailing `/embeddings` or `/rerank` segment from a configured
/// base URL, so callers can append the segment unconditionally.
pub fn normalize_base(base: &str, segment: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    let suffix = format!("/{segment}");
    trimmed.strip_suffix(suffix.as_str()).unwrap_or(trimmed).to_string()
}

impl ApiEmbedder {
    pub fn new(api_base: &str, model: &str, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            api_base: normalize_base(api_base, "embeddings"),
            model: model.to_string(),
            dimensions,
        }
    }

    async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.api_base);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "input": text, "model": self.model }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(StratumError::Internal(format!(
                "embedding request failed: {status}"
            )));
        }
        let body: serde_json::Value = response.json().await?;
        let embedding = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| StratumError::Internal("unexpected embedding response shape".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }
}

impl Embedder for ApiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.embed_async(text))
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Degrade reason emitted by [`FallbackEmbedder`] when the remote backend
/// fails and the deterministic hash backend stands in for it.
pub const EMBEDDING_FALLBACK_HASH: &str = "embedding_fallback_hash";
/// Degrade reason emitted when no embedder could produce a vector at all.
pub const EMBEDDING_REQUEST_FAILED: &str = "embedding_request_failed";

/// Wraps an optional remote embedder with an always-available hash
/// embedder. `embed_with_degrade` never fails: a remote error degrades to
/// the hash embedding and reports why.
pub struct FallbackEmbedder {
    remote: Option<Box<dyn Embedder>>,
    hash: HashEmbedder,
}

impl FallbackEmbedder {
    pub fn hash_only(dimensions: usize) -> Self {
        Self { remote: None, hash: HashEmbedder::new(dimensions) }
    }

    pub fn with_remote(remote: Box<dyn Embedder>, dimensions: usize) -> Self {
        Self { remote: Some(remote), hash: HashEmbedder::new(dimensions) }
    }

    pub fn dimensions(&self) -> usize {
        self.hash.dimensions()
    }

    pub fn embed_with_degrade(&self, text: &str) -> (Vec<f32>, Option<&'static str>) {
        if let Some(remote) = &self.remote {
            match remote.embed(text) {
                Ok(vector) => return (vector, None),
                Err(_) => {
                    let vector = self.hash.embed(text).unwrap_or_default();
                    return (vector, Some(EMBEDDING_FALLBACK_HASH));
                }
            }
        }
        (self.hash.embed(text).unwrap_or_default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::new(32);
        assert_eq!(e.embed("hello world").unwrap(), e.embed("hello world").unwrap());
        assert_ne!(e.embed("hello").unwrap(), e.embed("world").unwrap());
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn normalize_base_strips_embeddings_suffix() {
        assert_eq!(normalize_base("http://x/v1/embeddings", "embeddings"), "http://x/v1");
        assert_eq!(normalize_base("http://x/v1/embeddings/", "embeddings"), "http://x/v1");
        assert_eq!(normalize_base("http://x/v1", "embeddings"), "http://x/v1");
    }

    struct AlwaysFails;
    impl Embedder for AlwaysFails {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(StratumError::Internal("boom".into()))
        }
        fn dimensions(&self) -> usize {
            8
        }
    }

    #[test]
    fn fallback_embedder_degrades_to_hash_on_remote_failure() {
        let fallback = FallbackEmbedder::with_remote(Box::new(AlwaysFails), 8);
        let (vector, reason) = fallback.embed_with_degrade("hello");
        assert_eq!(vector.len(), 8);
        assert_eq!(reason, Some(EMBEDDING_FALLBACK_HASH));
    }

    #[test]
    fn fallback_embedder_hash_only_never_degrades() {
        let fallback = FallbackEmbedder::hash_only(8);
        let (_, reason) = fallback.embed_with_degrade("hello");
        assert_eq!(reason, None);
    }
}
