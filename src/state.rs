use crate::backend::{LocalVectorBackend, RemoteSearchBackend, SearchBackend};
use crate::cache::{HttpVectorStore, MemoryVectorStore, SemanticCache, VectorStore};
use crate::config::Config;
use crate::embedding::{CachingEmbedder, HttpEmbeddingClient};
use crate::error::Result;
use crate::router::{RouterOptions, ToolRouter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Application state shared across all request handlers.
///
/// # Semaphore Strategy
/// Permits = MAX_CONCURRENT_REQUESTS. Each routing request holds one permit
/// for its fan-out, bounding outstanding backend and embedding calls under
/// batch load.
pub struct AppState {
    pub router: Arc<ToolRouter>,
    pub cache: Option<Arc<SemanticCache>>,
    pub semaphore: Arc<Semaphore>,
    /// Flag indicating the service is ready (backends wired, index loaded).
    pub ready: AtomicBool,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the live collaborators from configuration.
    ///
    /// Backend registration order is fixed — remote first, then local —
    /// because fusion breaks score ties by first-seen source order.
    pub fn new(config: Config) -> Result<Self> {
        let provider = HttpEmbeddingClient::new(
            &config.embedding_endpoint,
            &config.embedding_deployment,
            &config.embedding_api_key,
            config.embedding_dimensions,
        )?;
        let embedder = Arc::new(CachingEmbedder::new(Arc::new(provider)));

        let mut backends: Vec<Arc<dyn SearchBackend>> = vec![Arc::new(RemoteSearchBackend::new(
            &config.search_endpoint,
            &config.search_index,
            &config.search_api_key,
        )?)];

        if config.use_local_tools {
            backends.push(Arc::new(LocalVectorBackend::from_snapshot_file(
                &config.local_index_path,
            )?));
        }

        let router = Arc::new(ToolRouter::new(
            backends,
            Arc::clone(&embedder),
            RouterOptions {
                top_k_per_source: config.tool_result_cnt,
                return_limit: config.tool_return_limit,
                min_score: config.minimum_tool_score,
                backend_timeout: config.backend_timeout,
            },
        ));

        let cache = if config.use_search_cache {
            let store: Arc<dyn VectorStore> = if config.cache_index.is_empty() {
                tracing::info!("No cache index configured, using in-process cache store");
                Arc::new(MemoryVectorStore::new())
            } else {
                Arc::new(HttpVectorStore::new(
                    &config.search_endpoint,
                    &config.cache_index,
                    &config.search_api_key,
                )?)
            };
            Some(Arc::new(SemanticCache::new(
                store,
                Arc::clone(&embedder),
                config.similarity_threshold,
                config.cache_ttl,
            )))
        } else {
            None
        };

        Ok(Self::from_parts(router, cache, config))
    }

    /// Assemble state from already-built collaborators. Tests use this to
    /// inject in-process doubles.
    pub fn from_parts(
        router: Arc<ToolRouter>,
        cache: Option<Arc<SemanticCache>>,
        config: Config,
    ) -> Self {
        let state = Self {
            router,
            cache,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            ready: AtomicBool::new(false),
            config: Arc::new(config),
        };
        state.ready.store(true, Ordering::SeqCst);
        state
    }

    /// Check if the service is ready to handle requests.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
