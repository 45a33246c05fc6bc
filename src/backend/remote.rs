//! Remote hybrid search backend.
//!
//! Speaks the hosted search service's JSON API: one POST per query with the
//! raw text (keyword leg) and the query embedding (vector leg). Hit ids are
//! composite `server_toolset_name` keys written at ingestion time; field
//! values take precedence over the id parse when both are present.

use crate::backend::{BackendQuery, SearchBackend};
use crate::error::{AppError, Result};
use crate::types::{CandidateHit, ToolIdentity, ToolMetadata};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SEARCH_API_VERSION: &str = "2024-07-01";

pub struct RemoteSearchBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "@search.score", default)]
    score: f64,
    id: String,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    toolset: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default)]
    sample_questions: Option<Vec<String>>,
    #[serde(default)]
    endpoint: Option<String>,
}

impl RemoteSearchBackend {
    pub fn new(endpoint: &str, index: &str, api_key: &str) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AppError::ValidationError(
                "Search endpoint cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::SearchError(format!("Failed to build HTTP client: {}", e)))?;

        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            endpoint.trim_end_matches('/'),
            index,
            SEARCH_API_VERSION
        );

        Ok(Self {
            client,
            url,
            api_key: api_key.to_string(),
        })
    }

    fn hit_to_candidate(hit: SearchHit) -> CandidateHit {
        let parsed = ToolIdentity::from_id(&hit.id);
        let identity = ToolIdentity {
            server: hit.server.unwrap_or(parsed.server),
            toolset: hit.toolset.filter(|t| !t.is_empty()).or(parsed.toolset),
            name: hit.name.unwrap_or(parsed.name),
        };

        CandidateHit {
            identity,
            score: hit.score,
            metadata: ToolMetadata {
                description: hit.description.unwrap_or_default(),
                keywords: hit.keywords.unwrap_or_default(),
                sample_questions: hit.sample_questions.unwrap_or_default(),
                endpoint: hit.endpoint.unwrap_or_default(),
            },
        }
    }
}

#[async_trait]
impl SearchBackend for RemoteSearchBackend {
    fn name(&self) -> &'static str {
        "remote_search"
    }

    async fn search(&self, request: &BackendQuery<'_>) -> Result<Vec<CandidateHit>> {
        let mut body = json!({
            "search": request.query,
            "top": request.top_k,
            "vectorQueries": [{
                "kind": "vector",
                "vector": request.embedding,
                "fields": "tool_vector",
                "k": request.top_k,
            }],
        });

        // The filter narrows candidates inside the index, before scoring.
        if let Some(allowed) = request.allowed_tools {
            let mut ids: Vec<&str> = allowed.iter().map(String::as_str).collect();
            ids.sort_unstable();
            body["filter"] = json!(format!("search.in(id, '{}', ',')", ids.join(",")));
        }

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::SearchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::SearchError(format!(
                "Search endpoint returned {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::SearchError(format!("Malformed search response: {}", e)))?;

        Ok(parsed.value.into_iter().map(Self::hit_to_candidate).collect())
    }
}
