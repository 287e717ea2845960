//! Optional cross-encoder-style reranking: a `{query, documents}` POST to a
//! remote reranker, returning a relevance order. Disabled by default;
//! failures degrade to pre-rerank order rather than raising.

use serde::Deserialize;
use std::time::Duration;

use crate::embedding::normalize_base;
use crate::error::Result;

pub trait Reranker: Send + Sync {
    /// Returns the indices of `documents`, most relevant first.
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<usize>>;
}

pub struct HttpReranker {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankEntry>,
}

#[derive(Deserialize)]
struct RerankEntry {
    index: usize,
}

impl HttpReranker {
    pub fn new(api_base: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            api_base: normalize_base(api_base, "rerank"),
            model: model.to_string(),
        }
    }

    async fn rerank_async(&self, query: &str, documents: &[String]) -> Result<Vec<usize>> {
        let url = format!("{}/rerank", self.api_base);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "query": query,
                "documents": documents,
            }))
            .send()
            .await?;
        let parsed: RerankResponse = response.error_for_status()?.json().await?;
        Ok(parsed.results.into_iter().map(|e| e.index).collect())
    }
}

impl Reranker for HttpReranker {
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<usize>> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.rerank_async(query, documents))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_strips_rerank_suffix() {
        assert_eq!(normalize_base("http://x/v1/rerank", "rerank"), "http://x/v1");
    }
}
