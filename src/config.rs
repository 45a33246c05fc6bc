use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    /// Maximum concurrent in-flight routing requests.
    pub max_concurrent_requests: usize,
    /// Per-backend top-k: how many hits each search source is asked for.
    pub tool_result_cnt: usize,
    /// Upper bound on the fused list returned to the caller.
    pub tool_return_limit: usize,
    /// Matches below this normalized score are dropped from the fused list.
    pub minimum_tool_score: f64,
    /// Register the local vector index as a second search source.
    pub use_local_tools: bool,
    /// Serve repeat queries from the semantic response cache.
    pub use_search_cache: bool,
    /// Minimum nearest-neighbor similarity for a cached response to count
    /// as a hit.
    pub similarity_threshold: f64,
    /// Cache record lifetime. Expired records are treated as misses.
    pub cache_ttl: Duration,
    /// Optional per-backend search deadline. None waits for every backend.
    pub backend_timeout: Option<Duration>,
    /// Embedding provider endpoint (Azure-OpenAI-shaped embeddings API).
    pub embedding_endpoint: String,
    pub embedding_deployment: String,
    pub embedding_dimensions: usize,
    pub embedding_api_key: String,
    /// Remote search service endpoint and tool index name.
    pub search_endpoint: String,
    pub search_index: String,
    pub search_api_key: String,
    /// Dedicated index for the semantic response cache. Empty means the
    /// cache falls back to an in-process store.
    pub cache_index: String,
    /// On-disk snapshot backing the local vector index.
    pub local_index_path: PathBuf,
    /// Evaluation harness: test-case file, sample size, chunk size.
    pub test_case_file: PathBuf,
    pub sample_size: usize,
    pub batch_size: usize,
    /// Count of external judge calls per query. Recognized for status
    /// reporting; subjective judging happens outside this service.
    pub tool_quality_judges: usize,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()?,
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            max_concurrent_requests: env::var("MAX_CONCURRENT_REQUESTS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            tool_result_cnt: env::var("TOOL_RESULT_CNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            tool_return_limit: env::var("TOOL_RETURN_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            minimum_tool_score: env::var("MINIMUM_TOOL_SCORE")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            use_local_tools: env::var("USE_LOCAL_TOOLS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            use_search_cache: env::var("USE_SEARCH_CACHE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            similarity_threshold: env::var("SIMILARITY_THRESHOLD")
                .unwrap_or_else(|_| "0.9".to_string())
                .parse()?,
            cache_ttl: Duration::from_secs(
                env::var("CACHE_TTL_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse::<u64>()?
                    * 3600,
            ),
            backend_timeout: env::var("BACKEND_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis),
            embedding_endpoint: env::var("EMBEDDING_ENDPOINT").unwrap_or_default(),
            embedding_deployment: env::var("EMBEDDING_DEPLOYMENT")
                .unwrap_or_else(|_| "text-embedding-3-large".to_string()),
            embedding_dimensions: env::var("EMBEDDING_DIMENSIONS")
                .unwrap_or_else(|_| "1536".to_string())
                .parse()?,
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            search_endpoint: env::var("SEARCH_ENDPOINT").unwrap_or_default(),
            search_index: env::var("SEARCH_INDEX").unwrap_or_else(|_| "tools".to_string()),
            search_api_key: env::var("SEARCH_API_KEY").unwrap_or_default(),
            cache_index: env::var("CACHE_INDEX").unwrap_or_default(),
            local_index_path: PathBuf::from(
                env::var("LOCAL_INDEX_PATH")
                    .unwrap_or_else(|_| ".semroute/tool_index.bin".to_string()),
            ),
            test_case_file: PathBuf::from(
                env::var("TEST_CASE_FILE").unwrap_or_else(|_| "data/test_cases.json".to_string()),
            ),
            sample_size: env::var("SAMPLE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            tool_quality_judges: env::var("TOOL_QUALITY_JUDGES")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
        })
    }
}
