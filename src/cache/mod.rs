//! Semantic response cache.
//!
//! Responses are keyed by query embedding rather than exact text: a lookup
//! probes the cache store for the nearest prior query and serves its stored
//! tool list when the similarity clears the configured threshold and the
//! record is still inside its TTL. Writes never block the request path;
//! they are handed to a background writer over a bounded queue and any
//! failure there is logged and dropped.

pub mod store;

pub use store::{CacheRecord, HttpVectorStore, MemoryVectorStore, ScoredRecord, VectorStore};

use crate::embedding::CachingEmbedder;
use crate::error::Result;
use crate::types::RankedToolList;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Depth of the background write queue. When routing outpaces the store,
/// further writes are dropped rather than queued without bound.
const WRITE_QUEUE_DEPTH: usize = 256;

pub struct SemanticCache {
    store: Arc<dyn VectorStore>,
    embedder: Arc<CachingEmbedder>,
    similarity_threshold: f64,
    writer_tx: mpsc::Sender<RankedToolList>,
}

impl SemanticCache {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<CachingEmbedder>,
        similarity_threshold: f64,
        ttl: std::time::Duration,
    ) -> Self {
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        tokio::spawn(Self::write_loop(
            Arc::clone(&store),
            Arc::clone(&embedder),
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
            writer_rx,
        ));

        Self {
            store,
            embedder,
            similarity_threshold,
            writer_tx,
        }
    }

    /// Look up a cached response for a semantically similar prior query.
    ///
    /// Returns the stored list verbatim (tool order preserved) with
    /// `execution_time_ms` rewritten to the lookup latency. Store errors
    /// and unparseable snapshots degrade to a miss; only a failed query
    /// embed surfaces, since without a vector neither the cache nor a live
    /// route can proceed.
    pub async fn get(&self, query: &str) -> Result<Option<RankedToolList>> {
        let start = Instant::now();
        let embedding = self.embedder.embed(query).await?;

        let candidates = match self.store.nearest(&embedding, 1).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Cache lookup failed, treating as miss");
                metrics::counter!("cache_lookup_errors_total").increment(1);
                return Ok(None);
            }
        };

        let Some(best) = candidates.into_iter().next() else {
            metrics::counter!("cache_misses_total").increment(1);
            return Ok(None);
        };

        if best.similarity < self.similarity_threshold {
            tracing::debug!(
                similarity = best.similarity,
                threshold = self.similarity_threshold,
                "Nearest cached query below threshold"
            );
            metrics::counter!("cache_misses_total").increment(1);
            return Ok(None);
        }

        if best.record.expires_at <= chrono::Utc::now() {
            tracing::debug!(record_id = %best.record.id, "Cached record expired");
            metrics::counter!("cache_expired_total").increment(1);
            return Ok(None);
        }

        let mut list: RankedToolList = match serde_json::from_str(&best.record.snapshot) {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(
                    record_id = %best.record.id,
                    error = %e,
                    "Unparseable cache snapshot, treating as miss"
                );
                metrics::counter!("cache_corrupt_total").increment(1);
                return Ok(None);
            }
        };

        list.execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!("cache_hits_total").increment(1);
        Ok(Some(list))
    }

    /// Queue a routed result for storage. Fire-and-forget: a full queue is
    /// logged and the write dropped; the caller already has its result.
    pub fn put(&self, list: RankedToolList) {
        if list.tools.is_empty() {
            return;
        }
        if let Err(e) = self.writer_tx.try_send(list) {
            tracing::warn!(error = %e, "Cache write queue full, dropping write");
            metrics::counter!("cache_write_drops_total").increment(1);
        }
    }

    /// Administrative bulk-clear of the backing store.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn write_loop(
        store: Arc<dyn VectorStore>,
        embedder: Arc<CachingEmbedder>,
        ttl: chrono::Duration,
        mut rx: mpsc::Receiver<RankedToolList>,
    ) {
        while let Some(list) = rx.recv().await {
            // The router embedded this query moments ago, so this is
            // normally a cache hit inside the embedder.
            let embedding = match embedder.embed(&list.query).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache write skipped, embed failed");
                    metrics::counter!("cache_write_failures_total").increment(1);
                    continue;
                }
            };

            let snapshot = match serde_json::to_string(&list) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache write skipped, serialization failed");
                    metrics::counter!("cache_write_failures_total").increment(1);
                    continue;
                }
            };

            let now = chrono::Utc::now();
            let record = CacheRecord {
                id: uuid::Uuid::new_v4().to_string(),
                created_at: now,
                expires_at: now + ttl,
                snapshot,
            };

            if let Err(e) = store.upsert(embedding.as_ref().clone(), record).await {
                tracing::warn!(error = %e, "Cache write failed");
                metrics::counter!("cache_write_failures_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::error::AppError;
    use crate::types::{ToolIdentity, ToolMetadata};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Embedder with a fixed text -> vector table, for exact control over
    /// similarity between "queries".
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| AppError::EmbeddingError(format!("no vector for '{}'", text)))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl VectorStore for FailingStore {
        async fn nearest(&self, _embedding: &[f32], _top_k: usize) -> Result<Vec<ScoredRecord>> {
            Err(AppError::CacheError("store down".to_string()))
        }

        async fn upsert(&self, _embedding: Vec<f32>, _record: CacheRecord) -> Result<()> {
            Err(AppError::CacheError("store down".to_string()))
        }

        async fn clear(&self) -> Result<()> {
            Err(AppError::CacheError("store down".to_string()))
        }
    }

    fn ranked_list(query: &str) -> RankedToolList {
        let hit = crate::types::CandidateHit {
            identity: ToolIdentity::new("srv", None, "toolA"),
            score: 0.0,
            metadata: ToolMetadata::default(),
        };
        let second = crate::types::CandidateHit {
            identity: ToolIdentity::new("srv", None, "toolB"),
            score: 0.0,
            metadata: ToolMetadata::default(),
        };
        RankedToolList {
            query: query.to_string(),
            tools: vec![hit.into_match(0.9), second.into_match(0.8)],
            execution_time_ms: 12.0,
        }
    }

    fn embedder_with(table: Vec<(&str, Vec<f32>)>) -> Arc<CachingEmbedder> {
        let table: HashMap<String, Vec<f32>> = table
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Arc::new(CachingEmbedder::new(Arc::new(TableEmbedder { table })))
    }

    async fn wait_for_writes(store: &MemoryVectorStore, expected: usize) {
        for _ in 0..100 {
            if store.len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("background writer never stored {} records", expected);
    }

    #[tokio::test]
    async fn test_put_then_similar_query_hits() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![
            ("original query", vec![1.0, 0.0]),
            // cosine vs [1, 0] = 0.99
            ("near duplicate", vec![0.99, 0.141]),
        ]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        cache.put(ranked_list("original query"));
        wait_for_writes(&store, 1).await;

        let hit = cache.get("near duplicate").await.unwrap();
        let list = hit.expect("similar query should hit");
        // Stored tool order comes back verbatim.
        assert_eq!(list.tools[0].name, "toolA");
        assert_eq!(list.tools[1].name, "toolB");
    }

    #[tokio::test]
    async fn test_similarity_below_threshold_is_miss() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![
            ("original query", vec![1.0, 0.0]),
            // cosine vs [1, 0] = 0.87, threshold 0.9
            ("drifted query", vec![0.87, 0.493]),
        ]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        cache.put(ranked_list("original query"));
        wait_for_writes(&store, 1).await;

        let result = cache.get("drifted query").await.unwrap();
        assert!(result.is_none(), "0.87 similarity must miss at 0.9 threshold");
    }

    #[tokio::test]
    async fn test_expired_record_is_miss() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        let now = chrono::Utc::now();
        store
            .upsert(
                vec![1.0, 0.0],
                CacheRecord {
                    id: "expired".to_string(),
                    created_at: now - chrono::Duration::hours(48),
                    expires_at: now - chrono::Duration::hours(24),
                    snapshot: serde_json::to_string(&ranked_list("the query")).unwrap(),
                },
            )
            .await
            .unwrap();

        let result = cache.get("the query").await.unwrap();
        assert!(result.is_none(), "expired record must miss despite perfect similarity");
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_miss_not_error() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        let now = chrono::Utc::now();
        store
            .upsert(
                vec![1.0, 0.0],
                CacheRecord {
                    id: "corrupt".to_string(),
                    created_at: now,
                    expires_at: now + chrono::Duration::hours(24),
                    snapshot: "definitely not json".to_string(),
                },
            )
            .await
            .unwrap();

        let result = cache.get("the query").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_miss_and_put_is_swallowed() {
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::new(FailingStore),
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        // Write failure is only observable in logs.
        cache.put(ranked_list("the query"));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = cache.get("the query").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_empty_lists_are_not_cached() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        cache.put(RankedToolList::empty("the query"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writes_accumulate_instead_of_overwriting() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        cache.put(ranked_list("the query"));
        cache.put(ranked_list("the query"));
        wait_for_writes(&store, 2).await;

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = embedder_with(vec![("the query", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(
            Arc::clone(&store) as Arc<dyn VectorStore>,
            embedder,
            0.9,
            Duration::from_secs(86_400),
        );

        cache.put(ranked_list("the query"));
        wait_for_writes(&store, 1).await;

        cache.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
