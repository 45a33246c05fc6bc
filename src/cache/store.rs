//! Cache backing stores.
//!
//! The semantic cache persists records through the same vector-search
//! interface the tool index uses, pointed at a dedicated index so cached
//! responses never mix with tool documents. An in-process store backs
//! deployments without a remote cache index, and the tests.

use crate::embedding::cosine_similarity;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

/// One cached response. Records are immutable once written: never updated,
/// never individually deleted, only dropped by `clear` or ignored once
/// expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Serialized `RankedToolList` snapshot (JSON text).
    pub snapshot: String,
}

/// A nearest-neighbor lookup result: the stored record plus its similarity
/// to the probe embedding.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub similarity: f64,
    pub record: CacheRecord,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest stored records by embedding similarity, best first.
    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>>;

    /// Write a new record. Always an insert; semantically similar prior
    /// records are left in place.
    async fn upsert(&self, embedding: Vec<f32>, record: CacheRecord) -> Result<()>;

    /// Administrative bulk-clear of every record.
    async fn clear(&self) -> Result<()>;
}

/// In-process vector store: linear cosine scan over all records.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: Mutex<Vec<(Vec<f32>, CacheRecord)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>> {
        let records = self.records.lock().unwrap();
        let mut scored: Vec<ScoredRecord> = records
            .iter()
            .map(|(stored, record)| ScoredRecord {
                similarity: cosine_similarity(embedding, stored) as f64,
                record: record.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn upsert(&self, embedding: Vec<f32>, record: CacheRecord) -> Result<()> {
        self.records.lock().unwrap().push((embedding, record));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().unwrap().clear();
        Ok(())
    }
}

const SEARCH_API_VERSION: &str = "2024-07-01";

/// Remote vector store speaking the hosted search service's API against a
/// dedicated cache index.
pub struct HttpVectorStore {
    client: reqwest::Client,
    search_url: String,
    index_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct StoreSearchResponse {
    #[serde(default)]
    value: Vec<StoreHit>,
}

#[derive(Deserialize)]
struct StoreHit {
    #[serde(rename = "@search.score", default)]
    score: f64,
    id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    snapshot: String,
}

impl HttpVectorStore {
    pub fn new(endpoint: &str, index: &str, api_key: &str) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AppError::ValidationError(
                "Cache store endpoint cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::CacheError(format!("Failed to build HTTP client: {}", e)))?;

        let base = endpoint.trim_end_matches('/');
        Ok(Self {
            client,
            search_url: format!(
                "{}/indexes/{}/docs/search?api-version={}",
                base, index, SEARCH_API_VERSION
            ),
            index_url: format!(
                "{}/indexes/{}/docs/index?api-version={}",
                base, index, SEARCH_API_VERSION
            ),
            api_key: api_key.to_string(),
        })
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::CacheError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::CacheError(format!(
                "Cache store returned {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredRecord>> {
        let body = json!({
            "top": top_k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": embedding,
                "fields": "query_vector",
                "k": top_k,
            }],
        });

        let parsed: StoreSearchResponse = self
            .post(&self.search_url, body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::CacheError(format!("Malformed cache response: {}", e)))?;

        Ok(parsed
            .value
            .into_iter()
            .map(|hit| ScoredRecord {
                similarity: hit.score,
                record: CacheRecord {
                    id: hit.id,
                    created_at: hit.created_at.unwrap_or_else(Utc::now),
                    // A record missing its expiry reads as already expired.
                    expires_at: hit.expires_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    snapshot: hit.snapshot,
                },
            })
            .collect())
    }

    async fn upsert(&self, embedding: Vec<f32>, record: CacheRecord) -> Result<()> {
        let body = json!({
            "value": [{
                "@search.action": "upload",
                "id": record.id,
                "query_vector": embedding,
                "created_at": record.created_at,
                "expires_at": record.expires_at,
                "snapshot": record.snapshot,
            }]
        });

        self.post(&self.index_url, body).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        // Collect ids first, then delete in bulk, mirroring the admin
        // clear flow of the search service.
        let listing: StoreSearchResponse = self
            .post(
                &self.search_url,
                json!({ "search": "*", "select": "id", "top": 1000 }),
            )
            .await?
            .json()
            .await
            .map_err(|e| AppError::CacheError(format!("Malformed cache response: {}", e)))?;

        if listing.value.is_empty() {
            return Ok(());
        }

        let deletions: Vec<serde_json::Value> = listing
            .value
            .iter()
            .map(|hit| json!({ "@search.action": "delete", "id": hit.id }))
            .collect();

        self.post(&self.index_url, json!({ "value": deletions }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> CacheRecord {
        CacheRecord {
            id: id.to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(24),
            snapshot: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        store.upsert(vec![1.0, 0.0], record("aligned")).await.unwrap();
        store.upsert(vec![0.0, 1.0], record("orthogonal")).await.unwrap();

        let hits = store.nearest(&[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].record.id, "aligned");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_memory_store_accumulates_near_duplicates() {
        let store = MemoryVectorStore::new();
        store.upsert(vec![1.0, 0.0], record("first")).await.unwrap();
        store.upsert(vec![1.0, 0.0], record("second")).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_clear() {
        let store = MemoryVectorStore::new();
        store.upsert(vec![1.0], record("a")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
