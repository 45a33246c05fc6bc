//! Tool routing handler.
//!
//! The single query-time endpoint: check the semantic cache, fall back to a
//! live fan-out route, hand the fresh result to the cache writer without
//! waiting on it, respond.

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::types::ToolMatch;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub query: String,
    /// Optional allowlist of composite tool ids. Restricts candidates
    /// inside each backend, before scoring.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    /// Milliseconds spent producing this list (cache lookup on a hit,
    /// embedding + fan-out + fusion on a live route).
    pub execution_time: f64,
    pub cache_hit: bool,
    pub tools: Vec<ToolMatch>,
}

/// PUT /get_mcp_tools/ - Resolve a natural-language query to ranked tools.
///
/// # Flow
/// 1. Validate the query (bearer token is accepted opaquely, not checked)
/// 2. Acquire a concurrency permit (503 when saturated)
/// 3. Semantic cache lookup, unless an allowed-tools filter is set
/// 4. On miss: live route, then fire-and-forget cache write
pub async fn route_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<RouteResponse>> {
    if request.query.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Query cannot be empty".to_string(),
        ));
    }

    let _permit = tokio::time::timeout(Duration::from_secs(10), state.semaphore.acquire())
        .await
        .map_err(|_| {
            AppError::ResourceError("Service temporarily overloaded, please retry".to_string())
        })?
        .map_err(|_| AppError::ResourceError("Semaphore closed".to_string()))?;

    let allowed: Option<HashSet<String>> = request
        .allowed_tools
        .map(|tools| tools.into_iter().collect());

    // Cached lists were produced without a filter, so a filtered request
    // always routes live.
    if allowed.is_none() {
        if let Some(cache) = &state.cache {
            if let Some(list) = cache.get(&request.query).await? {
                tracing::info!(
                    query = %request.query,
                    tools = list.tools.len(),
                    "Served from semantic cache"
                );
                metrics::counter!("route_cache_hits_total").increment(1);
                return Ok(Json(RouteResponse {
                    execution_time: list.execution_time_ms,
                    cache_hit: true,
                    tools: list.tools,
                }));
            }
        }
    }

    let list = state.router.route(&request.query, allowed.as_ref()).await?;

    if allowed.is_none() {
        if let Some(cache) = &state.cache {
            cache.put(list.clone());
        }
    }

    Ok(Json(RouteResponse {
        execution_time: list.execution_time_ms,
        cache_hit: false,
        tools: list.tools,
    }))
}
