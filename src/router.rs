//! Score fusion and routing.
//!
//! One route call embeds the query once, fans out to every registered
//! backend concurrently, joins all of them, and fuses whatever came back.
//! A failing backend contributes nothing; only a failed embed (no vector,
//! nothing to score) is surfaced to the caller.

use crate::backend::{BackendQuery, SearchBackend};
use crate::embedding::CachingEmbedder;
use crate::error::Result;
use crate::fusion::{fuse, normalize_hits};
use crate::types::{CandidateHit, RankedToolList};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RouterOptions {
    /// Hits requested from each backend.
    pub top_k_per_source: usize,
    /// Upper bound on the fused list.
    pub return_limit: usize,
    /// Normalized-score floor for fused matches.
    pub min_score: f64,
    /// Per-backend deadline. None preserves wait-for-all semantics: a slow
    /// backend stalls the whole call.
    pub backend_timeout: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            top_k_per_source: 10,
            return_limit: 10,
            min_score: 0.5,
            backend_timeout: None,
        }
    }
}

pub struct ToolRouter {
    backends: Vec<Arc<dyn SearchBackend>>,
    embedder: Arc<CachingEmbedder>,
    options: RouterOptions,
}

impl ToolRouter {
    pub fn new(
        backends: Vec<Arc<dyn SearchBackend>>,
        embedder: Arc<CachingEmbedder>,
        options: RouterOptions,
    ) -> Self {
        Self {
            backends,
            embedder,
            options,
        }
    }

    pub fn embedder(&self) -> Arc<CachingEmbedder> {
        Arc::clone(&self.embedder)
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Produce the fused, deduplicated, bounded tool list for a query.
    ///
    /// All backends are queried concurrently and all of them are awaited;
    /// per-backend errors (and timeouts, when a deadline is configured)
    /// degrade that source to zero hits. If every backend fails the call
    /// returns an empty list with `execution_time_ms = 0` instead of an
    /// error, keeping the caller path uniform.
    pub async fn route(
        &self,
        query: &str,
        allowed_tools: Option<&HashSet<String>>,
    ) -> Result<RankedToolList> {
        let start = Instant::now();

        let embedding = self.embedder.embed(query).await?;

        let searches = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            let embedding = Arc::clone(&embedding);
            let deadline = self.options.backend_timeout;
            let top_k = self.options.top_k_per_source;
            async move {
                let request = BackendQuery {
                    query,
                    embedding: &embedding,
                    top_k,
                    allowed_tools,
                };
                let outcome: Result<Vec<CandidateHit>> = match deadline {
                    Some(limit) => match tokio::time::timeout(limit, backend.search(&request)).await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::warn!(
                                backend = backend.name(),
                                timeout_ms = limit.as_millis() as u64,
                                "Backend search timed out"
                            );
                            Ok(Vec::new())
                        }
                    },
                    None => backend.search(&request).await,
                };
                (backend.name(), outcome)
            }
        });

        let results = futures::future::join_all(searches).await;

        let mut succeeded = 0usize;
        let mut source_lists = Vec::with_capacity(results.len());
        for (name, outcome) in results {
            match outcome {
                Ok(hits) => {
                    succeeded += 1;
                    tracing::debug!(backend = name, hits = hits.len(), "Backend search complete");
                    source_lists.push(normalize_hits(hits));
                }
                Err(e) => {
                    tracing::warn!(backend = name, error = %e, "Backend search failed");
                    metrics::counter!("backend_failures_total", "backend" => name).increment(1);
                }
            }
        }

        if succeeded == 0 && !self.backends.is_empty() {
            tracing::warn!(query, "All search backends failed, returning empty tool list");
            metrics::counter!("route_failures_total").increment(1);
            return Ok(RankedToolList::empty(query));
        }

        let tools = fuse(
            source_lists,
            self.options.min_score,
            self.options.return_limit,
        );

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!("route_requests_total").increment(1);
        metrics::histogram!("route_latency_ms").record(execution_time_ms);

        tracing::info!(
            query,
            tools = tools.len(),
            elapsed_ms = execution_time_ms as u64,
            "Route complete"
        );

        Ok(RankedToolList {
            query: query.to_string(),
            tools,
            execution_time_ms,
        })
    }
}
