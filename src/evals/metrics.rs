//! Selection-quality metrics.
//!
//! Everything here is a deterministic function of the returned list and the
//! expected-tool ground truth; the one exception is the redundancy score,
//! which needs an embedding per returned tool and degrades to 0.0 when the
//! provider is unavailable rather than failing an evaluation run.
//!
//! Expected tools are `server.name` strings, matched against the qualified
//! names of the returned matches.

use crate::embedding::EmbeddingProvider;
use crate::types::ToolMatch;
use ndarray::Array2;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MetricsResult {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub average_precision: f64,
    pub ndcg_at_k: f64,
    pub redundancy_score: f64,
    pub confusion_index: f64,
}

fn qualified_names(returned: &[ToolMatch]) -> Vec<String> {
    returned.iter().map(|t| t.qualified_name()).collect()
}

/// Share of expected tools present in the top-k of the returned list.
///
/// Normalized by the expected-set size, not by k; recall below uses the
/// same formula on purpose, so the two stay comparable across historical
/// test runs.
pub fn precision_at_k(returned: &[ToolMatch], expected: &[String], k: usize) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let overlap = qualified_names(returned)
        .iter()
        .take(k)
        .filter(|name| expected_set.contains(name.as_str()))
        .collect::<HashSet<_>>()
        .len();
    overlap as f64 / expected.len() as f64
}

/// Share of expected tools retrieved within the top-k. Deliberately the
/// same computation as `precision_at_k`.
pub fn recall_at_k(returned: &[ToolMatch], expected: &[String], k: usize) -> f64 {
    precision_at_k(returned, expected, k)
}

/// Ranking-sensitive precision: at every rank i holding an expected tool,
/// accumulate hits_so_far / i; the sum is divided by the expected-set size.
pub fn average_precision(returned: &[ToolMatch], expected: &[String], k: usize) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();

    let mut hits = 0usize;
    let mut sum_precisions = 0.0;
    for (idx, name) in qualified_names(returned).iter().take(k).enumerate() {
        if expected_set.contains(name.as_str()) {
            hits += 1;
            sum_precisions += hits as f64 / (idx + 1) as f64;
        }
    }
    sum_precisions / expected.len() as f64
}

fn dcg_at_k(returned_names: &[String], expected: &HashSet<&str>, k: usize) -> f64 {
    returned_names
        .iter()
        .take(k)
        .enumerate()
        .map(|(idx, name)| {
            let rel: u32 = expected.contains(name.as_str()).into();
            ((1u64 << rel) - 1) as f64 / ((idx + 2) as f64).log2()
        })
        .sum()
}

fn ideal_dcg_at_k(expected_len: usize, k: usize) -> f64 {
    (0..expected_len.min(k))
        .map(|idx| 1.0 / ((idx + 2) as f64).log2())
        .sum()
}

/// Normalized discounted cumulative gain with binary relevance. The ideal
/// ranking puts all expected tools in the leading positions.
pub fn ndcg_at_k(returned: &[ToolMatch], expected: &[String], k: usize) -> f64 {
    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let idcg = ideal_dcg_at_k(expected.len(), k);
    if idcg <= 0.0 {
        return 0.0;
    }
    dcg_at_k(&qualified_names(returned), &expected_set, k) / idcg
}

/// Mean pairwise cosine similarity among embedding rows, diagonal
/// excluded. High values mean the result set reads as near-duplicates.
pub fn redundancy_from_embeddings(embeddings: &Array2<f32>) -> f64 {
    let n = embeddings.nrows();
    if n < 2 {
        return 0.0;
    }

    // Normalize rows once, then pairwise similarity is a dot product.
    let mut normalized = embeddings.clone();
    for mut row in normalized.rows_mut() {
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|x| x / norm);
        }
    }

    let mut total = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                total += normalized.row(i).dot(&normalized.row(j)) as f64;
            }
        }
    }
    total / (n * (n - 1)) as f64
}

/// Computes the full metric set for one query's result.
pub struct MetricsEvaluator {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MetricsEvaluator {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    pub async fn evaluate(
        &self,
        returned: &[ToolMatch],
        expected: &[String],
        k: usize,
    ) -> MetricsResult {
        let redundancy_score = self.redundancy_score(returned).await;

        MetricsResult {
            precision_at_k: precision_at_k(returned, expected, k),
            recall_at_k: recall_at_k(returned, expected, k),
            average_precision: average_precision(returned, expected, k),
            ndcg_at_k: ndcg_at_k(returned, expected, k),
            redundancy_score,
            confusion_index: returned.len() as f64 * redundancy_score,
        }
    }

    async fn redundancy_score(&self, returned: &[ToolMatch]) -> f64 {
        if returned.len() < 2 {
            return 0.0;
        }

        let descriptions: Vec<String> = returned.iter().map(|t| t.description.clone()).collect();
        let vectors = match self.embedder.embed_batch(&descriptions).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(error = %e, "Redundancy embeddings unavailable, scoring 0.0");
                return 0.0;
            }
        };

        let Some(dim) = vectors.first().map(Vec::len) else {
            return 0.0;
        };
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            tracing::warn!("Inconsistent redundancy embedding dimensions, scoring 0.0");
            return 0.0;
        }

        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        match Array2::from_shape_vec((returned.len(), dim), flat) {
            Ok(matrix) => redundancy_from_embeddings(&matrix),
            Err(_) => 0.0,
        }
    }
}
