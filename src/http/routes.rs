//! Axum route handlers for the `/browse/node` and `/maintenance/...` surface.

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;

use super::state::AppState;
use crate::auth::{authorize, HeaderLookup};
use crate::concurrency::{EnqueueOutcome, TaskType};
use crate::error::StratumError;
use crate::guard::write_guard;
use crate::memory;
use crate::retrieval::{search_advanced, SearchFilters, SearchMode};
use crate::vitality::{cleanup_candidates, confirm_cleanup, prepare_cleanup, Selection};

pub fn router(state: AppState) -> Router {
    let maintenance = Router::new()
        .route("/observability/search", post(observability_search))
        .route("/observability/summary", get(observability_summary))
        .route("/index/status", get(index_status))
        .route("/index/jobs/:job_id/cancel", post(cancel_index_job))
        .route("/index/jobs/:job_id/retry", post(retry_index_job))
        .route("/vitality/decay", post(vitality_decay))
        .route("/vitality/candidates", get(vitality_candidates))
        .route("/vitality/prepare", post(vitality_prepare))
        .route("/vitality/confirm", post(vitality_confirm))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth_middleware));

    Router::new()
        .route("/browse/node", get(get_node).post(create_node).put(update_node).delete(delete_node))
        .nest("/maintenance", maintenance)
        .with_state(state)
}

struct AxumHeaders<'a>(&'a HeaderMap);
impl<'a> HeaderLookup for AxumHeaders<'a> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }
}

fn require_auth(state: &AppState, headers: &HeaderMap, remote: Option<SocketAddr>) -> Result<(), Response> {
    let lookup = AxumHeaders(headers);
    if authorize(&state.auth, &lookup, remote.map(|a| a.ip())) {
        Ok(())
    } else {
        Err(error_response(&StratumError::AuthFailed("invalid or missing API key".into())))
    }
}

/// Gates every route under `/maintenance` with the same auth check used
/// ad-hoc on the individual `/browse/node` write handlers, applied once at
/// the sub-router boundary instead of route-by-route.
async fn require_auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let remote = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0);
    if let Err(resp) = require_auth(&state, request.headers(), remote) {
        return resp;
    }
    next.run(request).await
}

fn error_response(err: &StratumError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "ok": false, "error": err.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct NodeQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_domain")]
    pub domain: String,
}

fn default_domain() -> String {
    "core".to_string()
}

async fn get_node(State(state): State<AppState>, Query(q): Query<NodeQuery>) -> Response {
    if q.path.is_empty() {
        let children = match memory::get_children(&state.store, None, Some(&q.domain)) {
            Ok(c) => c,
            Err(e) => return error_response(&e),
        };
        return Json(json!({
            "node": { "path": "", "domain": q.domain, "uri": format!("{}://", q.domain), "name": "", "content": "" },
            "children": children,
            "breadcrumbs": Vec::<Value>::new(),
        }))
        .into_response();
    }

    let memory_opt = match memory::get_memory_by_path(&state.store, &q.path, &q.domain) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };
    let Some(mem) = memory_opt else {
        return error_response(&StratumError::PathNotFound { domain: q.domain, path: q.path });
    };
    let gist = state
        .store
        .with_connection(|conn| crate::storage::queries::latest_gist(conn, mem.id))
        .ok()
        .flatten();
    let children = memory::get_children(&state.store, Some(mem.id), Some(&q.domain)).unwrap_or_default();
    let name = q.path.rsplit('/').next().unwrap_or(&q.path).to_string();
    let breadcrumbs: Vec<Value> = {
        let mut acc = String::new();
        let mut out = Vec::new();
        for segment in q.path.split('/') {
            if !acc.is_empty() {
                acc.push('/');
            }
            acc.push_str(segment);
            out.push(json!({ "path": acc.clone(), "label": segment }));
        }
        out
    };

    Json(json!({
        "node": {
            "path": q.path,
            "domain": q.domain,
            "uri": format!("{}://{}", q.domain, q.path),
            "name": name,
            "content": mem.content,
            "priority": mem.priority,
            "disclosure": mem.disclosure,
            "created_at": mem.created_at,
            "gist_text": gist.as_ref().map(|g| g.gist_text.clone()),
            "gist_method": gist.as_ref().map(|g| g.gist_method.as_str().to_string()),
            "gist_quality": gist.as_ref().map(|g| g.quality_score),
            "source_hash": gist.as_ref().map(|g| g.source_content_hash.clone()),
        },
        "children": children,
        "breadcrumbs": breadcrumbs,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeBody {
    #[serde(default)]
    pub parent_path: String,
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub priority: i32,
    pub disclosure: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
}

async fn create_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    remote: Option<axum::extract::ConnectInfo<SocketAddr>>,
    Json(body): Json<CreateNodeBody>,
) -> Response {
    if let Err(resp) = require_auth(&state, &headers, remote.map(|c| c.0)) {
        return resp;
    }
    let title = body.title.clone().unwrap_or_default();

    let decision = write_guard(
        &state.store,
        state.embedder.as_ref(),
        state.llm.as_deref(),
        &body.content,
        Some(&body.domain),
        Some(&body.parent_path),
        None,
    );
    if crate::guard::blocks_create(decision.action) {
        return Json(json!({
            "success": false,
            "created": false,
            "guard_action": decision.action,
            "guard_method": decision.method,
            "guard_reason": decision.reason,
            "degraded": decision.degraded,
            "degrade_reasons": decision.degrade_reasons,
            "message": format!("write blocked: {}", decision.reason),
        }))
        .into_response();
    }

    let result = state.write_lanes.run_write("default", "create_node", || async {
        memory::create_memory_with_disclosure(
            &state.store,
            &body.parent_path,
            &body.content,
            body.priority,
            &title,
            &body.domain,
            body.disclosure.as_deref(),
        )
    });

    match result.await {
        Ok(created) => {
            state.index_worker.enqueue(TaskType::ReindexMemory, Some(created.id), "create_node");
            Json(json!({
                "success": true,
                "created": true,
                "id": created.id,
                "uri": created.uri,
                "degraded": decision.degraded,
                "degrade_reasons": decision.degrade_reasons,
            }))
            .into_response()
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateNodeBody {
    pub content: Option<String>,
    pub priority: Option<i32>,
    pub disclosure: Option<Option<String>>,
}

async fn update_node(
    State(state): State<AppState>,
    Query(q): Query<NodeQuery>,
    headers: HeaderMap,
    remote: Option<axum::extract::ConnectInfo<SocketAddr>>,
    Json(body): Json<UpdateNodeBody>,
) -> Response {
    if let Err(resp) = require_auth(&state, &headers, remote.map(|c| c.0)) {
        return resp;
    }

    let result = state.write_lanes.run_write("default", "update_node", || async {
        memory::update_memory(
            &state.store,
            &q.path,
            &q.domain,
            body.content.as_deref(),
            body.priority,
            body.disclosure.as_ref().map(|d| d.as_deref()),
        )
    });

    match result.await {
        Ok(updated) => {
            if let Some(new_id) = updated.new_memory_id {
                state.index_worker.enqueue(TaskType::ReindexMemory, Some(new_id), "update_node");
            }
            Json(json!({ "success": true, "new_memory_id": updated.new_memory_id })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn delete_node(
    State(state): State<AppState>,
    Query(q): Query<NodeQuery>,
    headers: HeaderMap,
    remote: Option<axum::extract::ConnectInfo<SocketAddr>>,
) -> Response {
    if let Err(resp) = require_auth(&state, &headers, remote.map(|c| c.0)) {
        return resp;
    }
    let result = state.write_lanes.run_write("default", "delete_node", || async {
        memory::remove_path(&state.store, &q.path, &q.domain)
    });
    match result.await {
        Ok(removed) => Json(json!({ "success": true, "orphaned": removed.orphaned })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ObservabilitySearchBody {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: u32,
    #[serde(default)]
    pub include_session: bool,
    pub session_id: Option<String>,
    #[serde(default)]
    pub filters: ObservabilityFilters,
}

#[derive(Debug, Default, Deserialize, serde::Serialize)]
pub struct ObservabilityFilters {
    pub domain: Option<String>,
    pub path_prefix: Option<String>,
    pub max_priority: Option<i32>,
    pub updated_after: Option<String>,
}

fn default_max_results() -> usize {
    10
}
fn default_candidate_multiplier() -> u32 {
    3
}

async fn observability_search(State(state): State<AppState>, Json(body): Json<ObservabilitySearchBody>) -> Response {
    let mode_requested = body.mode.clone().unwrap_or_else(|| "hybrid".to_string());
    let mode = mode_requested.parse::<SearchMode>().unwrap_or(SearchMode::Hybrid);
    let filters = SearchFilters {
        domain: body.filters.domain.clone(),
        path_prefix: body.filters.path_prefix.clone(),
        max_priority: body.filters.max_priority,
        updated_after: body.filters.updated_after.clone(),
    };

    let cache_key = body.session_id.as_deref().filter(|s| body.include_session && !s.is_empty());
    let started_at = std::time::Instant::now();
    let cached = cache_key.and_then(|session_id| state.session_cache.get(session_id, &body.query));
    let (response, session_count, from_cache) = if let Some(cached) = cached {
        (cached, 1, true)
    } else {
        let response = search_advanced(
            &state.store,
            state.embedder.as_ref(),
            state.reranker.as_deref(),
            &body.query,
            mode,
            body.max_results,
            body.candidate_multiplier,
            &filters,
            None,
        );
        if let Some(session_id) = cache_key {
            state.session_cache.put(session_id, &body.query, response.clone());
        }
        (response, 0, false)
    };

    let latency_ms = started_at.elapsed().as_secs_f64() * 1000.0;

    state.observability.record_search(
        &state.store,
        crate::observability::SearchEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode_requested: mode_requested.clone(),
            mode_applied: response.mode.to_string(),
            latency_ms,
            degraded: response.degraded,
            degrade_reasons: response.degrade_reasons.clone(),
            session_count,
            global_count: response.results.len(),
            returned_count: response.results.len(),
            intent: response.metadata.intent.to_string(),
            intent_applied: response.metadata.intent.to_string(),
            strategy_template: response.metadata.strategy_template.to_string(),
            strategy_template_applied: response.metadata.strategy_template.to_string(),
        },
    );

    Json(json!({
        "ok": true,
        "query": body.query,
        "query_effective": body.query,
        "intent": response.metadata.intent,
        "intent_profile": Value::Null,
        "intent_applied": response.metadata.intent,
        "strategy_template": response.metadata.strategy_template,
        "strategy_template_applied": response.metadata.strategy_template,
        "mode_requested": mode_requested,
        "mode_applied": response.mode,
        "filters": body.filters,
        "max_results": body.max_results,
        "candidate_multiplier": body.candidate_multiplier,
        "degraded": response.degraded,
        "degrade_reasons": response.degrade_reasons,
        "from_session_cache": from_cache,
        "counts": { "session": session_count, "global": response.results.len(), "returned": response.results.len() },
        "results": response.results,
        "backend_metadata": { "candidate_multiplier_applied": response.metadata.candidate_multiplier_applied },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn observability_summary(State(state): State<AppState>) -> Response {
    Json(json!({
        "ok": true,
        "search_latency": state.observability.search_latency_aggregate(),
        "cleanup_latency": state.observability.cleanup_latency_aggregate(),
        "top_search_degrade_reasons": state.observability.top_search_degrade_reasons(5),
        "top_guard_degrade_reasons": state.observability.top_guard_degrade_reasons(5),
        "guard_action_breakdown": state.observability.guard_action_breakdown(),
        "search_mode_breakdown": state.observability.search_mode_breakdown(),
        "search_intent_breakdown": state.observability.search_intent_breakdown(),
        "degraded_search_ratio": state.observability.degraded_search_ratio(),
        "slow_cleanup_query_ratio": state.observability.slow_cleanup_query_ratio(),
    }))
    .into_response()
}

async fn index_status(State(state): State<AppState>) -> Response {
    let lane_status = state.write_lanes.status();
    Json(json!({ "ok": true, "write_lanes": lane_status })).into_response()
}

async fn cancel_index_job(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Response {
    match state.index_worker.cancel_job(&job_id, "requested via maintenance API") {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn retry_index_job(
    State(state): State<AppState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Response {
    let operation = state.index_worker.get(&job_id).map(|j| operation_name(j.task_type)).unwrap_or("unknown");
    match state.index_worker.retry_index_job(&job_id, None) {
        Ok(outcome) => match outcome {
            EnqueueOutcome::Queued { job_id } | EnqueueOutcome::Deduped { job_id } => {
                Json(json!({ "ok": true, "job_id": job_id })).into_response()
            }
            EnqueueOutcome::Dropped { reason } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "error": "index_job_enqueue_failed", "reason": reason, "operation": operation })),
            )
                .into_response(),
        },
        Err(e) => error_response(&e),
    }
}

fn operation_name(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::ReindexMemory => "reindex_memory",
        TaskType::RebuildIndex => "rebuild_index",
        TaskType::SleepConsolidation => "sleep_consolidation",
    }
}

async fn vitality_decay(State(state): State<AppState>) -> Response {
    let outcome = state.decay.apply(&state.store, false, "maintenance_api");
    Json(json!({ "ok": true, "outcome": outcome })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct VitalityCandidatesQuery {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_inactive_days")]
    pub inactive_days: i64,
    pub domain: Option<String>,
    pub path_prefix: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_threshold() -> f64 {
    0.2
}
fn default_inactive_days() -> i64 {
    30
}
fn default_limit() -> i64 {
    100
}

async fn vitality_candidates(State(state): State<AppState>, Query(q): Query<VitalityCandidatesQuery>) -> Response {
    match cleanup_candidates(&state.store, q.threshold, q.inactive_days, q.domain.as_deref(), q.path_prefix.as_deref(), q.limit) {
        Ok(candidates) => Json(json!({ "ok": true, "candidates": candidates })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct VitalityPrepareBody {
    pub action: String,
    pub selections: Vec<SelectionBody>,
    pub reviewer: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectionBody {
    pub memory_id: i64,
    pub state_hash: String,
}

async fn vitality_prepare(State(state): State<AppState>, Json(body): Json<VitalityPrepareBody>) -> Response {
    let selections = body
        .selections
        .into_iter()
        .map(|s| Selection { memory_id: s.memory_id, state_hash: s.state_hash })
        .collect();
    match prepare_cleanup(&state.store, &state.review, &body.action, selections, &body.reviewer) {
        Ok(outcome) => Json(json!({ "ok": true, "outcome": outcome })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct VitalityConfirmBody {
    pub review_id: String,
    pub token: String,
    pub confirmation_phrase: String,
}

async fn vitality_confirm(State(state): State<AppState>, Json(body): Json<VitalityConfirmBody>) -> Response {
    match confirm_cleanup(&state.store, &state.review, &body.review_id, &body.token, &body.confirmation_phrase) {
        Ok(outcome) => Json(json!({ "ok": true, "outcome": outcome })).into_response(),
        Err(e) => error_response(&e),
    }
}
