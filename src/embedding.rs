//! Embedding provider seam.
//!
//! The embedding model runs out of process; this module holds the trait the
//! rest of the system depends on, the HTTP client speaking the
//! Azure-OpenAI-shaped embeddings API, and a bounded in-process cache that
//! fronts any provider so repeat queries skip the network round trip.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the query -> embedding cache.
pub const EMBEDDING_CACHE_CAPACITY: u64 = 1_000;

/// Text to fixed-dimension vector. May fail transiently; a failed embed is
/// fatal for the query that needed it (no vector, nothing to score).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. The default loops over `embed`; providers with
    /// a native batch API override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// HTTP client for a hosted embedding deployment.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    dimensions: usize,
}

impl HttpEmbeddingClient {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_key: &str,
        dimensions: usize,
    ) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AppError::ValidationError(
                "Embedding endpoint cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::EmbeddingError(format!("Failed to build HTTP client: {}", e)))?;

        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version=2024-02-01",
            endpoint.trim_end_matches('/'),
            deployment
        );

        Ok(Self {
            client,
            url,
            api_key: api_key.to_string(),
            dimensions,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest {
                input,
                dimensions: self.dimensions,
            })
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::EmbeddingError(format!(
                "Embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::EmbeddingError(format!("Malformed embedding response: {}", e)))?;

        if body.data.len() != input.len() {
            return Err(AppError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                input.len(),
                body.data.len()
            )));
        }

        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        let mut vectors = self.request(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::EmbeddingError("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Bounded query -> embedding cache wrapping any provider.
///
/// Owned by the process-lifetime router instance and injected wherever
/// query embeddings are needed, so the router and the semantic cache share
/// one embed per query text.
pub struct CachingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(inner, EMBEDDING_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EmbeddingProvider>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::new(capacity),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit);
        }

        let vector = Arc::new(self.inner.embed(text).await?);
        self.cache.insert(text.to_string(), Arc::clone(&vector));
        Ok(vector)
    }

    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.inner)
    }
}

/// Cosine similarity between two vectors. Falls back to 0.0 when either
/// vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError("provider down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_repeat_query_served_from_cache() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = CachingEmbedder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);

        let first = embedder.embed("list my open tickets").await.unwrap();
        let second = embedder.embed("list my open tickets").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_queries_each_hit_provider() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = CachingEmbedder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);

        embedder.embed("query one").await.unwrap();
        embedder.embed("query two").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let embedder = CachingEmbedder::new(Arc::new(FailingProvider));
        let result = embedder.embed("anything").await;
        assert!(matches!(result, Err(AppError::EmbeddingError(_))));
    }

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_norm() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
