//! MCP tool definitions and dispatch for Stratum's six memory tools.

use serde_json::{json, Value};

use super::protocol::{ToolCallResult, ToolDefinition};
use crate::guard::{blocks_create, blocks_update, write_guard};
use crate::http::AppState;
use crate::memory;
use crate::retrieval::{search_advanced, SearchFilters, SearchMode};

/// All tool definitions: `(name, description, JSON schema)`.
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "search_memory",
        "Search stored memories by keyword, semantic similarity, or both, with tiered degrade reporting.",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "mode": {"type": "string", "enum": ["keyword", "semantic", "hybrid"], "default": "hybrid"},
                "max_results": {"type": "integer", "default": 10},
                "candidate_multiplier": {"type": "integer", "default": 3},
                "domain": {"type": "string", "description": "Restrict results to this domain"},
                "path_prefix": {"type": "string", "description": "Restrict results to paths under this prefix"},
                "max_priority": {"type": "integer"},
                "updated_after": {"type": "string", "format": "date-time"},
                "session_id": {"type": "string", "description": "When set, repeated searches for the same session+query are served from a short-lived cache"}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "compact_context",
        "Signal that the caller has flushed its accumulated context; resets this session's flush counters and reports whether a flush was already due.",
        r#"{
            "type": "object",
            "properties": {
                "session_id": {"type": "string", "description": "Caller-scoped session identifier"}
            },
            "required": ["session_id"]
        }"#,
    ),
    (
        "create_memory",
        "Create a new memory under parent_path. The write-admission guard may redirect this into an update or a no-op instead of creating a duplicate.",
        r#"{
            "type": "object",
            "properties": {
                "parent_path": {"type": "string", "default": ""},
                "title": {"type": "string", "description": "Leaf path segment"},
                "content": {"type": "string"},
                "priority": {"type": "integer", "default": 0},
                "disclosure": {"type": "string"},
                "domain": {"type": "string", "default": "core"}
            },
            "required": ["title", "content"]
        }"#,
    ),
    (
        "update_memory",
        "Update an existing memory's content, priority, or disclosure. A content change creates a new version; metadata-only changes mutate in place.",
        r#"{
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "domain": {"type": "string", "default": "core"},
                "content": {"type": "string"},
                "priority": {"type": "integer"},
                "disclosure": {"type": "string"}
            },
            "required": ["path"]
        }"#,
    ),
    (
        "read_memory",
        "Read a memory by its addressable path, including its gist and children.",
        r#"{
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "domain": {"type": "string", "default": "core"}
            },
            "required": ["path"]
        }"#,
    ),
    (
        "rebuild_index",
        "Enqueue a full index rebuild job on the background index worker.",
        r#"{
            "type": "object",
            "properties": {
                "reason": {"type": "string", "default": "manual_request"}
            }
        }"#,
    ),
];

pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).unwrap_or(json!({})),
        })
        .collect()
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn param_str_or<'a>(params: &'a Value, key: &str, default: &'a str) -> &'a str {
    param_str(params, key).unwrap_or(default)
}

/// Dispatch a `tools/call` request's `name`/`arguments` to the matching
/// handler. Every tool runs synchronously from the caller's perspective:
/// async work (write lanes, the index worker) is bridged via the runtime
/// handle already threaded through `AppState`'s write path.
pub async fn call_tool(state: &AppState, name: &str, params: Value) -> ToolCallResult {
    match name {
        "search_memory" => search_memory(state, params),
        "compact_context" => compact_context(state, params),
        "create_memory" => create_memory(state, params).await,
        "update_memory" => update_memory(state, params).await,
        "read_memory" => read_memory(state, params),
        "rebuild_index" => rebuild_index(state, params),
        other => ToolCallResult::error(format!("unknown tool: {other}")),
    }
}

fn search_memory(state: &AppState, params: Value) -> ToolCallResult {
    let query = param_str_or(&params, "query", "");
    let mode_requested = param_str_or(&params, "mode", "hybrid").to_string();
    let mode = mode_requested.parse::<SearchMode>().unwrap_or(SearchMode::Hybrid);
    let max_results = params.get("max_results").and_then(Value::as_u64).unwrap_or(10) as usize;
    let candidate_multiplier = params.get("candidate_multiplier").and_then(Value::as_u64).unwrap_or(3) as u32;

    let filters = SearchFilters {
        domain: param_str(&params, "domain").map(str::to_string),
        path_prefix: param_str(&params, "path_prefix").map(str::to_string),
        max_priority: params.get("max_priority").and_then(Value::as_i64).map(|v| v as i32),
        updated_after: param_str(&params, "updated_after").map(str::to_string),
    };

    let session_id = param_str(&params, "session_id");
    let started_at = std::time::Instant::now();
    let cached = session_id.and_then(|s| state.session_cache.get(s, query));
    let (response, from_cache) = if let Some(cached) = cached {
        (cached, true)
    } else {
        let response = search_advanced(
            &state.store,
            state.embedder.as_ref(),
            state.reranker.as_deref(),
            query,
            mode,
            max_results,
            candidate_multiplier,
            &filters,
            None,
        );
        if let Some(s) = session_id {
            state.session_cache.put(s, query, response.clone());
        }
        (response, false)
    };

    state.observability.record_search(
        &state.store,
        crate::observability::SearchEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode_requested: mode_requested.clone(),
            mode_applied: response.mode.to_string(),
            latency_ms: started_at.elapsed().as_secs_f64() * 1000.0,
            degraded: response.degraded,
            degrade_reasons: response.degrade_reasons.clone(),
            session_count: if from_cache { 1 } else { 0 },
            global_count: response.results.len(),
            returned_count: response.results.len(),
            intent: response.metadata.intent.to_string(),
            intent_applied: response.metadata.intent.to_string(),
            strategy_template: response.metadata.strategy_template.to_string(),
            strategy_template_applied: response.metadata.strategy_template.to_string(),
        },
    );

    ToolCallResult::json(&json!({
        "ok": true,
        "query": query,
        "query_effective": query,
        "mode_requested": mode_requested,
        "mode_applied": response.mode,
        "results": response.results,
        "degraded": response.degraded,
        "intent": response.metadata.intent,
        "intent_profile": Value::Null,
        "strategy_template": response.metadata.strategy_template,
        "from_session_cache": from_cache,
        "backend_method": "search_advanced",
    }))
}

fn compact_context(state: &AppState, params: Value) -> ToolCallResult {
    let session_id = param_str_or(&params, "session_id", "default");
    let already_due = state.flush_tracker.should_flush(session_id);
    state.flush_tracker.reset(session_id);
    ToolCallResult::json(&json!({ "ok": true, "session_id": session_id, "was_due": already_due }))
}

async fn create_memory(state: &AppState, params: Value) -> ToolCallResult {
    let parent_path = param_str_or(&params, "parent_path", "").to_string();
    let title = param_str_or(&params, "title", "").to_string();
    let content = param_str_or(&params, "content", "").to_string();
    let priority = params.get("priority").and_then(Value::as_i64).unwrap_or(0) as i32;
    let disclosure = param_str(&params, "disclosure").map(str::to_string);
    let domain = param_str_or(&params, "domain", "core").to_string();

    let decision = write_guard(
        &state.store,
        state.embedder.as_ref(),
        state.llm.as_deref(),
        &content,
        Some(&domain),
        Some(&parent_path),
        None,
    );
    if blocks_create(decision.action) {
        return ToolCallResult::json(&json!({
            "success": false,
            "created": false,
            "guard_action": decision.action,
            "guard_reason": decision.reason,
            "target_uri": decision.target_uri,
            "degraded": decision.degraded,
            "degrade_reasons": decision.degrade_reasons,
        }));
    }

    let result = state
        .write_lanes
        .run_write("default", "create_memory", || async {
            memory::create_memory_with_disclosure(
                &state.store,
                &parent_path,
                &content,
                priority,
                &title,
                &domain,
                disclosure.as_deref(),
            )
        })
        .await;

    match result {
        Ok(created) => {
            state.index_worker.enqueue(
                crate::concurrency::TaskType::ReindexMemory,
                Some(created.id),
                "create_memory",
            );
            ToolCallResult::json(&json!({
                "success": true,
                "created": true,
                "id": created.id,
                "uri": created.uri,
                "degraded": decision.degraded,
                "degrade_reasons": decision.degrade_reasons,
            }))
        }
        Err(e) => ToolCallResult::error(e.to_string()),
    }
}

async fn update_memory(state: &AppState, params: Value) -> ToolCallResult {
    let path = param_str_or(&params, "path", "").to_string();
    let domain = param_str_or(&params, "domain", "core").to_string();
    let content = param_str(&params, "content").map(str::to_string);
    let priority = params.get("priority").and_then(Value::as_i64).map(|v| v as i32);
    let disclosure_given = params.get("disclosure").is_some();
    let disclosure: Option<Option<&str>> =
        if disclosure_given { Some(param_str(&params, "disclosure")) } else { None };

    let current = match memory::get_memory_by_path(&state.store, &path, &domain) {
        Ok(Some(m)) => m,
        Ok(None) => return ToolCallResult::error(format!("{domain}://{path} not found")),
        Err(e) => return ToolCallResult::error(e.to_string()),
    };

    if let Some(new_content) = &content {
        let decision = write_guard(
            &state.store,
            state.embedder.as_ref(),
            state.llm.as_deref(),
            new_content,
            Some(&domain),
            None,
            Some(current.id),
        );
        if blocks_update(decision.action, decision.target_id, current.id) {
            return ToolCallResult::json(&json!({
                "success": false,
                "guard_action": decision.action,
                "guard_reason": decision.reason,
                "degraded": decision.degraded,
                "degrade_reasons": decision.degrade_reasons,
            }));
        }
    }

    let result = state
        .write_lanes
        .run_write("default", "update_memory", || async {
            memory::update_memory(&state.store, &path, &domain, content.as_deref(), priority, disclosure)
        })
        .await;

    match result {
        Ok(updated) => {
            if let Some(new_id) = updated.new_memory_id {
                state.index_worker.enqueue(
                    crate::concurrency::TaskType::ReindexMemory,
                    Some(new_id),
                    "update_memory",
                );
            }
            ToolCallResult::json(&json!({ "success": true, "new_memory_id": updated.new_memory_id }))
        }
        Err(e) => ToolCallResult::error(e.to_string()),
    }
}

fn read_memory(state: &AppState, params: Value) -> ToolCallResult {
    let path = param_str_or(&params, "path", "").to_string();
    let domain = param_str_or(&params, "domain", "core").to_string();

    match memory::get_memory_by_path(&state.store, &path, &domain) {
        Ok(Some(m)) => {
            let gist = state
                .store
                .with_connection(|conn| crate::storage::queries::latest_gist(conn, m.id))
                .ok()
                .flatten();
            let children = memory::get_children(&state.store, Some(m.id), Some(&domain)).unwrap_or_default();
            ToolCallResult::json(&json!({
                "ok": true,
                "uri": format!("{domain}://{path}"),
                "content": m.content,
                "priority": m.priority,
                "disclosure": m.disclosure,
                "gist_text": gist.as_ref().map(|g| g.gist_text.clone()),
                "gist_method": gist.as_ref().map(|g| g.gist_method.as_str()),
                "children": children,
            }))
        }
        Ok(None) => ToolCallResult::json(&json!({ "ok": false, "error": "not_found" })),
        Err(e) => ToolCallResult::error(e.to_string()),
    }
}

fn rebuild_index(state: &AppState, params: Value) -> ToolCallResult {
    let reason = param_str_or(&params, "reason", "manual_request").to_string();
    let outcome = state.index_worker.enqueue(crate::concurrency::TaskType::RebuildIndex, None, &reason);
    ToolCallResult::json(&json!({ "ok": true, "outcome": outcome }))
}
