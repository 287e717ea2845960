//! Shared application state threaded through every HTTP handler.

use std::sync::Arc;

use crate::auth::AuthConfig;
use crate::concurrency::{FlushTracker, IndexWorker, WriteLaneCoordinator};
use crate::embedding::FallbackEmbedder;
use crate::llm::LlmProvider;
use crate::observability::Observability;
use crate::retrieval::session_cache::SessionCache;
use crate::retrieval::{Reranker, SearchResponse};
use crate::storage::Store;
use crate::vitality::{DecayCoordinator, ReviewCoordinator};

#[derive(Clone)]
pub struct AppState(pub Arc<AppStateInner>);

pub struct AppStateInner {
    pub store: Store,
    pub embedder: Option<FallbackEmbedder>,
    pub llm: Option<Box<dyn LlmProvider>>,
    pub reranker: Option<Box<dyn Reranker>>,
    pub auth: AuthConfig,
    pub observability: Observability,
    pub index_worker: Arc<IndexWorker>,
    pub write_lanes: WriteLaneCoordinator,
    pub decay: DecayCoordinator,
    pub review: ReviewCoordinator,
    pub flush_tracker: FlushTracker,
    pub session_cache: SessionCache<SearchResponse>,
}

impl std::ops::Deref for AppState {
    type Target = AppStateInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
