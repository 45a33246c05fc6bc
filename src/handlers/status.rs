//! Router status handler.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /get_router_status - Current configuration and wired services.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let backend_names = state.router.backend_names();
    let service = |name: &'static str| {
        if backend_names.contains(&name) {
            "initialized"
        } else {
            "not_initialized"
        }
    };

    Json(json!({
        "status": if state.is_ready() { "active" } else { "starting" },
        "configuration": {
            "max_concurrent_requests": state.config.max_concurrent_requests,
            "tool_result_count": state.config.tool_result_cnt,
            "tool_return_limit": state.config.tool_return_limit,
            "use_local_tools": state.config.use_local_tools,
            "use_search_cache": state.config.use_search_cache,
            "minimum_tool_score": state.config.minimum_tool_score,
            "tool_quality_judges": state.config.tool_quality_judges,
        },
        "services": {
            "remote_search": service("remote_search"),
            "local_search": service("local_search"),
            "search_cache": if state.cache.is_some() { "initialized" } else { "not_initialized" },
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
