//! Local in-process vector index.
//!
//! Brute-force cosine search over pre-computed, L2-normalized tool
//! embeddings loaded from the on-disk snapshot. At tool-corpus scale a
//! linear scan beats an ANN structure on simplicity and is still
//! microseconds per query.

use crate::backend::{BackendQuery, SearchBackend};
use crate::error::{AppError, Result};
use crate::index_snapshot::{IndexedTool, ToolIndexSnapshot};
use crate::types::CandidateHit;
use async_trait::async_trait;
use ndarray::{Array1, Array2};
use std::path::Path;

pub struct LocalVectorBackend {
    tools: Vec<IndexedTool>,
    /// Row i is the normalized embedding of tools[i].
    embeddings: Array2<f32>,
}

impl LocalVectorBackend {
    /// Load the index from a snapshot file.
    pub fn from_snapshot_file(path: &Path) -> Result<Self> {
        let snapshot = ToolIndexSnapshot::load(path)?.ok_or_else(|| {
            AppError::SnapshotError(format!("No usable tool index at {}", path.display()))
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_snapshot(snapshot: ToolIndexSnapshot) -> Self {
        let ToolIndexSnapshot {
            tools,
            mut embeddings,
        } = snapshot;

        // Normalize rows so similarity search reduces to a dot product.
        for mut row in embeddings.rows_mut() {
            let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|x| x / norm);
            }
        }

        tracing::info!(
            num_tools = tools.len(),
            embedding_dim = embeddings.ncols(),
            "Local vector index ready"
        );

        Self { tools, embeddings }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl SearchBackend for LocalVectorBackend {
    fn name(&self) -> &'static str {
        "local_search"
    }

    async fn search(&self, request: &BackendQuery<'_>) -> Result<Vec<CandidateHit>> {
        if request.embedding.len() != self.embeddings.ncols() {
            return Err(AppError::SearchError(format!(
                "Query embedding has {} dimensions, index expects {}",
                request.embedding.len(),
                self.embeddings.ncols()
            )));
        }

        let mut query = Array1::from_vec(request.embedding.to_vec());
        let norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            query.mapv_inplace(|x| x / norm);
        }

        // Candidates are restricted before scoring when a filter is set.
        let mut scored: Vec<(usize, f32)> = self
            .tools
            .iter()
            .enumerate()
            .filter(|(_, tool)| {
                request
                    .allowed_tools
                    .map(|allowed| allowed.contains(&tool.identity.id()))
                    .unwrap_or(true)
            })
            .map(|(idx, _)| (idx, query.dot(&self.embeddings.row(idx))))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.top_k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| {
                let tool = &self.tools[idx];
                CandidateHit {
                    identity: tool.identity.clone(),
                    score: score as f64,
                    metadata: tool.metadata.clone(),
                }
            })
            .collect())
    }
}
