//! Stratum MCP server
//!
//! Run with: stratum-server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratum::auth::AuthConfig;
use stratum::concurrency::{FlushConfig, FlushTracker, IndexWorker, JobRunner, TaskType, WriteLaneCoordinator};
use stratum::config::parse_bool_flag;
use stratum::consolidation::{run_consolidation, ConsolidationConfig};
use stratum::embedding::{ApiEmbedder, FallbackEmbedder};
use stratum::error::Result;
use stratum::http::{router, AppState, AppStateInner};
use stratum::llm::{HttpLlmProvider, LlmProvider};
use stratum::mcp::{
    call_tool, get_tool_definitions, methods, InitializeResult, McpHandler, McpRequest, McpResponse,
    McpServer, ToolCallResult,
};
use stratum::observability::Observability;
use stratum::retrieval::rerank::HttpReranker;
use stratum::retrieval::session_cache::{SessionCache, SessionCacheConfig};
use stratum::retrieval::Reranker;
use stratum::types::MemoryId;
use stratum::vitality::{DecayConfig, DecayCoordinator, ReviewCoordinator};
use stratum::Store;

/// Every env key here matches the documented name in the environment
/// reference 1:1 (`RUNTIME_*`, `RETRIEVAL_*`, `WRITE_GUARD_*`,
/// `COMPACT_GIST_*`, `OBSERVABILITY_*`). Boolean flags are parsed as raw
/// strings and normalized post-parse through [`parse_bool_flag`] rather than
/// fighting clap's own bool parser, which doesn't recognize `on`/`enabled`.
#[derive(Parser, Debug)]
#[command(name = "stratum-server")]
#[command(about = "Stratum MCP server for hierarchical AI memory")]
struct Args {
    /// Database path
    #[arg(long, env = "DATABASE_URL", default_value = "~/.local/share/stratum/memories.db")]
    db_path: String,

    /// HTTP surface port (0 = disabled, MCP-over-stdio runs regardless)
    #[arg(long, env = "STRATUM_HTTP_PORT", default_value = "0")]
    http_port: u16,

    /// Embedding backend: "none" (no embedder), "hash" (deterministic
    /// fallback), or "api" (remote embedding service)
    #[arg(long, env = "RETRIEVAL_EMBEDDING_BACKEND", default_value = "hash")]
    embedding_backend: String,
    #[arg(long, env = "RETRIEVAL_EMBEDDING_API_BASE")]
    embedding_api_base: Option<String>,
    #[arg(long, env = "RETRIEVAL_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,
    #[arg(long, env = "RETRIEVAL_EMBEDDING_DIM", default_value = "384")]
    embedding_dim: usize,

    /// Remote reranker for tiered retrieval (optional)
    #[arg(long, env = "RETRIEVAL_RERANKER_ENABLED", default_value = "false")]
    reranker_enabled: String,
    #[arg(long, env = "RETRIEVAL_RERANKER_API_BASE")]
    reranker_api_base: Option<String>,
    #[arg(long, env = "RETRIEVAL_RERANKER_MODEL", default_value = "rerank-v1")]
    reranker_model: String,

    /// LLM arbiter for the write-admission guard (optional; falls back to
    /// deterministic thresholds when disabled or unset)
    #[arg(long, env = "WRITE_GUARD_LLM_ENABLED", default_value = "false")]
    write_guard_llm_enabled: String,
    #[arg(long, env = "WRITE_GUARD_LLM_API_BASE")]
    write_guard_llm_api_base: Option<String>,
    #[arg(long, env = "WRITE_GUARD_LLM_MODEL", default_value = "gpt-4o-mini")]
    write_guard_llm_model: String,

    /// LLM-generated fragment-rollup gists (optional; falls back to the
    /// extractive-bullets method when disabled or unset)
    #[arg(long, env = "COMPACT_GIST_LLM_ENABLED", default_value = "false")]
    compact_gist_llm_enabled: String,
    #[arg(long, env = "COMPACT_GIST_LLM_API_BASE")]
    compact_gist_llm_api_base: Option<String>,
    #[arg(long, env = "COMPACT_GIST_LLM_MODEL", default_value = "gpt-4o-mini")]
    compact_gist_llm_model: String,

    /// Background index-worker queue bound, completed-job retention, and
    /// whether the drain loop runs at all
    #[arg(long, env = "RUNTIME_INDEX_QUEUE_MAXSIZE", default_value = "500")]
    index_queue_maxsize: usize,
    #[arg(long, env = "RUNTIME_INDEX_RECENT_JOBS", default_value = "200")]
    index_recent_jobs: usize,
    #[arg(long, env = "RUNTIME_INDEX_WORKER_ENABLED", default_value = "true")]
    index_worker_enabled: String,

    /// Cross-session write concurrency
    #[arg(long, env = "RUNTIME_WRITE_GLOBAL_CONCURRENCY", default_value = "4")]
    write_global_concurrency: usize,

    /// Vitality decay throttle
    #[arg(long, env = "RUNTIME_VITALITY_DECAY_CHECK_INTERVAL_SECONDS", default_value = "3600")]
    vitality_decay_check_interval_seconds: u64,

    /// Cleanup review coordinator: pending-review TTL and bound
    #[arg(long, env = "RUNTIME_CLEANUP_REVIEW_TTL_SECONDS", default_value = "300")]
    cleanup_review_ttl_seconds: u64,
    #[arg(long, env = "RUNTIME_CLEANUP_REVIEW_MAX_PENDING", default_value = "50")]
    cleanup_review_max_pending: usize,

    /// Sleep-time consolidation policy (interval 0 or disabled = job never runs)
    #[arg(long, env = "RUNTIME_SLEEP_CONSOLIDATION_ENABLED", default_value = "true")]
    sleep_consolidation_enabled: String,
    #[arg(long, env = "RUNTIME_SLEEP_CONSOLIDATION_INTERVAL_SECONDS", default_value = "1800")]
    sleep_consolidation_interval_seconds: u64,
    #[arg(long, env = "RUNTIME_SLEEP_DEDUP_APPLY", default_value = "false")]
    sleep_dedup_apply: String,
    #[arg(long, env = "RUNTIME_SLEEP_FRAGMENT_ROLLUP_APPLY", default_value = "false")]
    sleep_fragment_rollup_apply: String,

    /// Per-session search result cache bounds
    #[arg(long, env = "RUNTIME_SESSION_CACHE_MAX_HITS", default_value = "5")]
    session_cache_max_hits: u32,
    #[arg(long, env = "RUNTIME_SESSION_CACHE_HALF_LIFE_SECONDS", default_value = "60")]
    session_cache_half_life_seconds: u64,

    /// Flush tracker thresholds for `compact_context`'s "was a flush due" signal
    #[arg(long, env = "RUNTIME_FLUSH_TRIGGER_CHARS", default_value = "20000")]
    flush_trigger_chars: u64,
    #[arg(long, env = "RUNTIME_FLUSH_MIN_EVENTS", default_value = "3")]
    flush_min_events: u64,
    #[arg(long, env = "RUNTIME_FLUSH_MAX_EVENTS", default_value = "200")]
    flush_max_events: u64,

    /// Slow-query threshold recorded against cleanup-preview queries
    #[arg(long, env = "OBSERVABILITY_CLEANUP_QUERY_SLOW_MS", default_value = "250.0")]
    observability_cleanup_query_slow_ms: f64,
}

impl Args {
    fn reranker_enabled(&self) -> bool {
        parse_bool_flag(&self.reranker_enabled)
    }
    fn write_guard_llm_enabled(&self) -> bool {
        parse_bool_flag(&self.write_guard_llm_enabled)
    }
    fn compact_gist_llm_enabled(&self) -> bool {
        parse_bool_flag(&self.compact_gist_llm_enabled)
    }
    fn index_worker_enabled(&self) -> bool {
        parse_bool_flag(&self.index_worker_enabled)
    }
    fn sleep_consolidation_enabled(&self) -> bool {
        parse_bool_flag(&self.sleep_consolidation_enabled)
    }
    fn consolidation_config(&self) -> ConsolidationConfig {
        ConsolidationConfig {
            dedup_apply_enabled: parse_bool_flag(&self.sleep_dedup_apply),
            fragment_rollup_apply_enabled: parse_bool_flag(&self.sleep_fragment_rollup_apply),
            ..Default::default()
        }
    }
}

fn build_embedder(args: &Args) -> Option<FallbackEmbedder> {
    match args.embedding_backend.as_str() {
        "none" => None,
        "api" => match &args.embedding_api_base {
            Some(base) => {
                let remote = ApiEmbedder::new(base, &args.embedding_model, args.embedding_dim);
                Some(FallbackEmbedder::with_remote(Box::new(remote), args.embedding_dim))
            }
            None => {
                tracing::warn!("RETRIEVAL_EMBEDDING_BACKEND=api but no RETRIEVAL_EMBEDDING_API_BASE set, falling back to hash");
                Some(FallbackEmbedder::hash_only(args.embedding_dim))
            }
        },
        other => {
            if other != "hash" {
                tracing::warn!(backend = other, "unrecognized RETRIEVAL_EMBEDDING_BACKEND, defaulting to hash");
            }
            Some(FallbackEmbedder::hash_only(args.embedding_dim))
        }
    }
}

fn build_llm(args: &Args) -> Option<Box<dyn LlmProvider>> {
    if !args.write_guard_llm_enabled() {
        return None;
    }
    args.write_guard_llm_api_base
        .as_ref()
        .map(|base| Box::new(HttpLlmProvider::new(base, &args.write_guard_llm_model)) as Box<dyn LlmProvider>)
}

fn build_gist_llm(args: &Args) -> Option<Box<dyn LlmProvider>> {
    if !args.compact_gist_llm_enabled() {
        return None;
    }
    args.compact_gist_llm_api_base
        .as_ref()
        .map(|base| Box::new(HttpLlmProvider::new(base, &args.compact_gist_llm_model)) as Box<dyn LlmProvider>)
}

fn build_reranker(args: &Args) -> Option<Box<dyn Reranker>> {
    if !args.reranker_enabled() {
        return None;
    }
    args.reranker_api_base
        .as_ref()
        .map(|base| Box::new(HttpReranker::new(base, &args.reranker_model)) as Box<dyn Reranker>)
}

/// Wires [`run_consolidation`] into the index worker's `SleepConsolidation`
/// task; `ReindexMemory`/`RebuildIndex` are no-ops since retrieval always
/// scans live rows directly rather than maintaining a separate index.
struct ConsolidationJobRunner {
    store: Store,
    config: ConsolidationConfig,
    gist_llm: Option<Box<dyn LlmProvider>>,
}

#[async_trait::async_trait]
impl JobRunner for ConsolidationJobRunner {
    async fn run(&self, task_type: TaskType, _memory_id: Option<MemoryId>) -> Result<()> {
        match task_type {
            TaskType::ReindexMemory | TaskType::RebuildIndex => Ok(()),
            TaskType::SleepConsolidation => {
                let report = run_consolidation(
                    &self.store,
                    None,
                    &self.config,
                    self.gist_llm.as_deref(),
                    "index_worker_job",
                );
                if report.degraded {
                    tracing::warn!(reasons = ?report.degrade_reasons, "sleep consolidation degraded");
                }
                Ok(())
            }
        }
    }
}

struct StratumHandler {
    state: AppState,
    runtime: tokio::runtime::Runtime,
}

impl StratumHandler {
    fn handle_tool_call(&self, name: &str, arguments: serde_json::Value) -> ToolCallResult {
        self.runtime.block_on(call_tool(&self.state, name, arguments))
    }
}

impl McpHandler for StratumHandler {
    fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => McpResponse::success(request.id, json!(InitializeResult::default())),
            methods::INITIALIZED => McpResponse::success(request.id, json!({})),
            methods::LIST_TOOLS => {
                let tools = get_tool_definitions();
                McpResponse::success(request.id, json!({ "tools": tools }))
            }
            methods::CALL_TOOL => {
                let name = request.params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
                let result = self.handle_tool_call(&name, arguments);
                McpResponse::success(request.id, json!(result))
            }
            other => McpResponse::error(request.id, -32601, format!("Method not found: {other}")),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let db_path = shellexpand::tilde(&args.db_path).to_string();
    let store = Store::open(&db_path)?;

    let embedder = build_embedder(&args);
    let llm = build_llm(&args);
    let reranker = build_reranker(&args);
    let auth = AuthConfig::from_env();

    let observability = Observability::new(args.observability_cleanup_query_slow_ms);
    observability.load(&store);

    let index_worker = IndexWorker::new(args.index_queue_maxsize, args.index_recent_jobs);
    let write_lanes = WriteLaneCoordinator::new(args.write_global_concurrency);
    let decay = DecayCoordinator::new(DecayConfig {
        check_interval_seconds: args.vitality_decay_check_interval_seconds,
    });
    let review = ReviewCoordinator::new(Duration::from_secs(args.cleanup_review_ttl_seconds), args.cleanup_review_max_pending);
    let flush_tracker = FlushTracker::new(FlushConfig {
        trigger_chars: args.flush_trigger_chars,
        min_events: args.flush_min_events,
        max_events: args.flush_max_events,
    });
    let session_cache = SessionCache::new(SessionCacheConfig {
        max_hits: args.session_cache_max_hits,
        half_life: Duration::from_secs(args.session_cache_half_life_seconds),
    });

    let state = AppState(Arc::new(AppStateInner {
        store: store.clone(),
        embedder,
        llm,
        reranker,
        auth,
        observability,
        index_worker: index_worker.clone(),
        write_lanes,
        decay,
        review,
        flush_tracker,
        session_cache,
    }));

    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let consolidation_config = args.consolidation_config();

    // The index worker's drain loop runs on its own background thread and
    // runtime, independent of the stdio-blocked main thread.
    if args.index_worker_enabled() {
        let worker = index_worker.clone();
        let job_store = store.clone();
        let job_config = consolidation_config;
        let job_gist_llm = build_gist_llm(&args);
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("failed to create index worker runtime");
            rt.block_on(worker.run_forever(Arc::new(ConsolidationJobRunner {
                store: job_store,
                config: job_config,
                gist_llm: job_gist_llm,
            })));
        });
    } else {
        tracing::warn!("RUNTIME_INDEX_WORKER_ENABLED is off; queued index jobs will never drain");
    }

    // Sleep-time consolidation ticks on its own schedule.
    if args.sleep_consolidation_enabled() && args.sleep_consolidation_interval_seconds > 0 {
        let consolidation_store = store.clone();
        let consolidation_worker = index_worker.clone();
        let consolidation_gist_llm = build_gist_llm(&args);
        let interval = Duration::from_secs(args.sleep_consolidation_interval_seconds);
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            let report = run_consolidation(
                &consolidation_store,
                Some(consolidation_worker.as_ref()),
                &consolidation_config,
                consolidation_gist_llm.as_deref(),
                "scheduled",
            );
            if report.degraded {
                tracing::warn!(reasons = ?report.degrade_reasons, "sleep consolidation degraded");
            }
        });
    }

    if args.http_port > 0 {
        let http_state = state.clone();
        let port = args.http_port;
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("failed to create http runtime");
            rt.block_on(async move {
                let app = router(http_state);
                let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await.expect("bind http port");
                tracing::info!("HTTP surface listening on 0.0.0.0:{port}");
                if let Err(e) = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
                )
                .await
                {
                    tracing::error!("HTTP server error: {e}");
                }
            });
        });
    }

    let handler = StratumHandler { state, runtime };
    let server = McpServer::new(handler);

    tracing::info!("Stratum MCP server starting...");
    server.run()?;

    Ok(())
}
