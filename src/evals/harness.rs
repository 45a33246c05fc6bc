//! Batch evaluation harness.
//!
//! Drives many (query, expected_tools) pairs through the same
//! cache-then-route path the service uses, grades each result, and folds
//! the outcomes into one summary: match buckets, latency percentiles, and
//! averaged quality metrics.

use crate::cache::SemanticCache;
use crate::evals::metrics::{MetricsEvaluator, MetricsResult};
use crate::router::ToolRouter;
use crate::types::RankedToolList;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub question: String,
    /// Ground truth as `server.name` strings, best tools first.
    pub expected_tools: Vec<String>,
}

/// Which (single) match bucket a query falls into. Buckets are mutually
/// exclusive and checked in ascending order: a top-1 match never also
/// counts as top-3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchBuckets {
    pub matched: bool,
    pub top_1: bool,
    pub top_3: bool,
    pub top_5: bool,
    pub top_10: bool,
}

pub fn assign_match_buckets(returned: &[String], expected: &[String]) -> MatchBuckets {
    let hit_within = |k: usize| {
        returned
            .iter()
            .take(k)
            .any(|name| expected.iter().any(|e| e == name))
    };

    let mut buckets = MatchBuckets::default();
    if hit_within(1) {
        buckets.top_1 = true;
    } else if hit_within(3) {
        buckets.top_3 = true;
    } else if hit_within(5) {
        buckets.top_5 = true;
    } else if hit_within(10) {
        buckets.top_10 = true;
    }
    buckets.matched = buckets.top_1 || buckets.top_3 || buckets.top_5 || buckets.top_10;
    buckets
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    pub expected_tools: Vec<String>,
    pub returned_tools: Vec<String>,
    pub matching_tools: Vec<String>,
    pub missing_tools: Vec<String>,
    pub unexpected_tools: Vec<String>,
    pub response_time_ms: f64,
    pub cache_hit: bool,
    pub buckets: MatchBuckets,
    pub metrics: MetricsResult,
}

/// Interpolated percentile over an unsorted sample (numpy-style linear
/// interpolation between closest ranks). Returns 0.0 on an empty sample.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    sorted[lower] + (rank - lower as f64) * (sorted[upper] - sorted[lower])
}

#[derive(Debug, Serialize)]
pub struct EvalSummary {
    pub total_queries: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_time_ms: f64,
    pub cache_hits: usize,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub matches: usize,
    pub top_1_matches: usize,
    pub top_3_matches: usize,
    pub top_5_matches: usize,
    pub top_10_matches: usize,
    pub avg_precision_at_k: f64,
    pub avg_recall_at_k: f64,
    pub avg_average_precision: f64,
    pub avg_ndcg_at_k: f64,
    pub avg_redundancy_score: f64,
    pub avg_confusion_index: f64,
    /// Expected tools that went missing, with how often, most-missed first.
    pub commonly_missed: Vec<(String, usize)>,
}

pub fn summarize(outcomes: &[QueryOutcome], total_queries: usize, total_time_ms: f64) -> EvalSummary {
    let completed = outcomes.len();
    let response_times: Vec<f64> = outcomes.iter().map(|o| o.response_time_ms).collect();

    let avg = |extract: fn(&MetricsResult) -> f64| -> f64 {
        if outcomes.is_empty() {
            return 0.0;
        }
        outcomes.iter().map(|o| extract(&o.metrics)).sum::<f64>() / outcomes.len() as f64
    };

    let mut missed: HashMap<String, usize> = HashMap::new();
    for outcome in outcomes {
        for tool in &outcome.missing_tools {
            *missed.entry(tool.clone()).or_insert(0) += 1;
        }
    }
    let mut commonly_missed: Vec<(String, usize)> = missed.into_iter().collect();
    commonly_missed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    EvalSummary {
        total_queries,
        completed,
        failed: total_queries.saturating_sub(completed),
        total_time_ms,
        cache_hits: outcomes.iter().filter(|o| o.cache_hit).count(),
        p50_ms: percentile(&response_times, 50.0),
        p75_ms: percentile(&response_times, 75.0),
        p90_ms: percentile(&response_times, 90.0),
        p95_ms: percentile(&response_times, 95.0),
        matches: outcomes.iter().filter(|o| o.buckets.matched).count(),
        top_1_matches: outcomes.iter().filter(|o| o.buckets.top_1).count(),
        top_3_matches: outcomes.iter().filter(|o| o.buckets.top_3).count(),
        top_5_matches: outcomes.iter().filter(|o| o.buckets.top_5).count(),
        top_10_matches: outcomes.iter().filter(|o| o.buckets.top_10).count(),
        avg_precision_at_k: avg(|m| m.precision_at_k),
        avg_recall_at_k: avg(|m| m.recall_at_k),
        avg_average_precision: avg(|m| m.average_precision),
        avg_ndcg_at_k: avg(|m| m.ndcg_at_k),
        avg_redundancy_score: avg(|m| m.redundancy_score),
        avg_confusion_index: avg(|m| m.confusion_index),
        commonly_missed,
    }
}

impl EvalSummary {
    /// Human-readable run report.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let pct = |count: usize, total: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            }
        };

        let _ = writeln!(out, "====TEST RUN SUMMARY====");
        let _ = writeln!(out, "Total queries processed: {}", self.total_queries);
        let _ = writeln!(out, "Successful queries: {}", self.completed);
        let _ = writeln!(out, "Failed queries: {}", self.failed);
        let _ = writeln!(
            out,
            "Cache hit rate: {:.1}%",
            pct(self.cache_hits, self.completed)
        );
        let _ = writeln!(out, "Total execution time: {:.2} s", self.total_time_ms / 1000.0);
        let _ = writeln!(out, "TP50 response time: {:.2} ms", self.p50_ms);
        let _ = writeln!(out, "TP75 response time: {:.2} ms", self.p75_ms);
        let _ = writeln!(out, "TP90 response time: {:.2} ms", self.p90_ms);
        let _ = writeln!(out, "TP95 response time: {:.2} ms", self.p95_ms);
        let _ = writeln!(out, "\n====MATCH SUMMARY====");
        let _ = writeln!(
            out,
            "Match success rate: {:.1}% ({})",
            pct(self.matches, self.completed),
            self.matches
        );
        let _ = writeln!(out, "Matches in first slot: {}", self.top_1_matches);
        let _ = writeln!(out, "Matches in top 3: {}", self.top_3_matches);
        let _ = writeln!(out, "Matches in top 5: {}", self.top_5_matches);
        let _ = writeln!(out, "Matches in top 10: {}", self.top_10_matches);
        let _ = writeln!(out, "\n====SELECTION QUALITY====");
        let _ = writeln!(out, "Precision@K:       {:.4}", self.avg_precision_at_k);
        let _ = writeln!(out, "Recall@K:          {:.4}", self.avg_recall_at_k);
        let _ = writeln!(out, "Average Precision: {:.4}", self.avg_average_precision);
        let _ = writeln!(out, "nDCG@K:            {:.4}", self.avg_ndcg_at_k);
        let _ = writeln!(out, "Redundancy Score:  {:.4}", self.avg_redundancy_score);
        let _ = writeln!(out, "Confusion Index:   {:.4}", self.avg_confusion_index);

        if !self.commonly_missed.is_empty() {
            let _ = writeln!(out, "\n====COMMONLY MISSED TOOLS====");
            for (tool, count) in &self.commonly_missed {
                let _ = writeln!(out, "{}: {}", tool, count);
            }
        }

        out
    }
}

pub struct HarnessOptions {
    /// Concurrent in-flight queries across the whole run.
    pub max_concurrent: usize,
    /// Queries launched per chunk; bounds peak outstanding work.
    pub batch_size: usize,
    /// Upper bound on cases taken from the (shuffled) test file.
    pub sample_size: usize,
    /// k handed to the metrics evaluator.
    pub metrics_k: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 15,
            batch_size: 10,
            sample_size: 500,
            metrics_k: 10,
        }
    }
}

pub struct EvalHarness {
    router: Arc<ToolRouter>,
    cache: Option<Arc<SemanticCache>>,
    evaluator: MetricsEvaluator,
    options: HarnessOptions,
}

/// Load test cases from a JSON file of `{question, expected_tools}`.
pub fn load_test_cases(path: &Path) -> crate::error::Result<Vec<TestCase>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        crate::error::AppError::ValidationError(format!(
            "Failed to read test case file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        crate::error::AppError::ValidationError(format!("Malformed test case file: {}", e))
    })
}

impl EvalHarness {
    pub fn new(
        router: Arc<ToolRouter>,
        cache: Option<Arc<SemanticCache>>,
        evaluator: MetricsEvaluator,
        options: HarnessOptions,
    ) -> Self {
        Self {
            router,
            cache,
            evaluator,
            options,
        }
    }

    /// Run a batch of test cases and fold the outcomes into a summary.
    pub async fn run(&self, mut cases: Vec<TestCase>) -> EvalSummary {
        let started = Instant::now();

        cases.shuffle(&mut rand::thread_rng());
        cases.truncate(self.options.sample_size);
        let total_queries = cases.len();

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent));
        let mut outcomes: Vec<QueryOutcome> = Vec::with_capacity(total_queries);

        for chunk in cases.chunks(self.options.batch_size) {
            let batch = chunk.iter().map(|case| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    self.run_single(case).await
                }
            });
            outcomes.extend(
                futures::future::join_all(batch)
                    .await
                    .into_iter()
                    .flatten(),
            );
        }

        let total_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        summarize(&outcomes, total_queries, total_time_ms)
    }

    async fn run_single(&self, case: &TestCase) -> Option<QueryOutcome> {
        let (list, cache_hit) = self.lookup(&case.question).await?;

        let returned_tools: Vec<String> = list.tools.iter().map(|t| t.qualified_name()).collect();
        let matching_tools: Vec<String> = returned_tools
            .iter()
            .filter(|name| case.expected_tools.contains(name))
            .cloned()
            .collect();
        let missing_tools: Vec<String> = case
            .expected_tools
            .iter()
            .filter(|name| !returned_tools.contains(name))
            .cloned()
            .collect();
        let unexpected_tools: Vec<String> = returned_tools
            .iter()
            .filter(|name| !case.expected_tools.contains(name))
            .cloned()
            .collect();

        let buckets = assign_match_buckets(&returned_tools, &case.expected_tools);
        let metrics = self
            .evaluator
            .evaluate(&list.tools, &case.expected_tools, self.options.metrics_k)
            .await;

        Some(QueryOutcome {
            query: case.question.clone(),
            expected_tools: case.expected_tools.clone(),
            returned_tools,
            matching_tools,
            missing_tools,
            unexpected_tools,
            response_time_ms: list.execution_time_ms,
            cache_hit,
            buckets,
            metrics,
        })
    }

    /// The same cache-then-route path the service endpoint takes.
    async fn lookup(&self, query: &str) -> Option<(RankedToolList, bool)> {
        if let Some(cache) = &self.cache {
            match cache.get(query).await {
                Ok(Some(list)) => return Some((list, true)),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(query, error = %e, "Cache lookup failed during eval run");
                    return None;
                }
            }
        }

        match self.router.route(query, None).await {
            Ok(list) => {
                if let Some(cache) = &self.cache {
                    cache.put(list.clone());
                }
                Some((list, false))
            }
            Err(e) => {
                tracing::error!(query, error = %e, "Route failed during eval run");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendQuery, SearchBackend};
    use crate::cache::MemoryVectorStore;
    use crate::embedding::{CachingEmbedder, EmbeddingProvider};
    use crate::error::Result;
    use crate::router::RouterOptions;
    use crate::types::{CandidateHit, ToolIdentity, ToolMetadata};
    use async_trait::async_trait;
    use std::time::Duration;

    #[test]
    fn test_bucket_rank_one_is_top_1_only() {
        let buckets = assign_match_buckets(
            &["srv.a".to_string(), "srv.b".to_string()],
            &["srv.a".to_string()],
        );
        assert!(buckets.matched && buckets.top_1);
        assert!(!buckets.top_3 && !buckets.top_5 && !buckets.top_10);
    }

    #[test]
    fn test_bucket_rank_two_is_top_3_only() {
        let returned: Vec<String> = ["x", "hit", "y"].iter().map(|s| format!("srv.{}", s)).collect();
        let buckets = assign_match_buckets(&returned, &["srv.hit".to_string()]);
        assert!(buckets.matched && buckets.top_3);
        assert!(!buckets.top_1 && !buckets.top_5 && !buckets.top_10);
    }

    #[test]
    fn test_bucket_rank_four_is_top_5_only() {
        let returned: Vec<String> = ["a", "b", "c", "hit"]
            .iter()
            .map(|s| format!("srv.{}", s))
            .collect();
        let buckets = assign_match_buckets(&returned, &["srv.hit".to_string()]);
        assert!(buckets.matched && buckets.top_5);
        assert!(!buckets.top_1 && !buckets.top_3 && !buckets.top_10);
    }

    #[test]
    fn test_bucket_rank_past_ten_never_matches() {
        let mut returned: Vec<String> = (0..10).map(|i| format!("srv.t{}", i)).collect();
        returned.push("srv.hit".to_string());
        let buckets = assign_match_buckets(&returned, &["srv.hit".to_string()]);
        assert_eq!(buckets, MatchBuckets::default());
    }

    #[test]
    fn test_at_most_one_bucket_is_set() {
        let returned: Vec<String> = (0..10).map(|i| format!("srv.t{}", i)).collect();
        for hit_rank in 0..10 {
            let expected = vec![format!("srv.t{}", hit_rank)];
            let buckets = assign_match_buckets(&returned, &expected);
            let set = [buckets.top_1, buckets.top_3, buckets.top_5, buckets.top_10]
                .iter()
                .filter(|b| **b)
                .count();
            assert_eq!(set, 1, "rank {} set {} buckets", hit_rank, set);
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 50.0), 25.0);
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&values, 100.0), 40.0);
        assert!((percentile(&values, 95.0) - 38.5).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_single_value_and_empty() {
        assert_eq!(percentile(&[7.0], 90.0), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_summarize_counts_missed_tools() {
        let outcome = |missing: Vec<&str>| QueryOutcome {
            query: "q".to_string(),
            expected_tools: Vec::new(),
            returned_tools: Vec::new(),
            matching_tools: Vec::new(),
            missing_tools: missing.into_iter().map(String::from).collect(),
            unexpected_tools: Vec::new(),
            response_time_ms: 10.0,
            cache_hit: false,
            buckets: MatchBuckets::default(),
            metrics: MetricsResult::default(),
        };

        let outcomes = vec![
            outcome(vec!["srv.a", "srv.b"]),
            outcome(vec!["srv.a"]),
            outcome(vec![]),
        ];
        let summary = summarize(&outcomes, 4, 100.0);

        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.commonly_missed[0], ("srv.a".to_string(), 2));
        assert_eq!(summary.commonly_missed[1], ("srv.b".to_string(), 1));
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct StaticBackend;

    #[async_trait]
    impl SearchBackend for StaticBackend {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn search(&self, _request: &BackendQuery<'_>) -> Result<Vec<CandidateHit>> {
            Ok(vec![
                CandidateHit {
                    identity: ToolIdentity::new("srv", None, "alpha"),
                    score: 0.9,
                    metadata: ToolMetadata::default(),
                },
                CandidateHit {
                    identity: ToolIdentity::new("srv", None, "beta"),
                    score: 0.5,
                    metadata: ToolMetadata::default(),
                },
            ])
        }
    }

    fn make_harness(cache_store: Option<Arc<MemoryVectorStore>>) -> EvalHarness {
        let embedder = Arc::new(CachingEmbedder::new(Arc::new(StubEmbedder)));
        let router = Arc::new(ToolRouter::new(
            vec![Arc::new(StaticBackend)],
            Arc::clone(&embedder),
            RouterOptions {
                min_score: 0.0,
                ..Default::default()
            },
        ));
        let cache = cache_store.map(|store| {
            Arc::new(SemanticCache::new(
                store as Arc<dyn crate::cache::VectorStore>,
                Arc::clone(&embedder),
                0.9,
                Duration::from_secs(86_400),
            ))
        });
        let evaluator = MetricsEvaluator::new(Arc::new(StubEmbedder));
        EvalHarness::new(router, cache, evaluator, HarnessOptions::default())
    }

    #[tokio::test]
    async fn test_run_grades_all_cases() {
        let harness = make_harness(None);
        let cases = vec![
            TestCase {
                question: "find alpha".to_string(),
                expected_tools: vec!["srv.alpha".to_string()],
            },
            TestCase {
                question: "find gamma".to_string(),
                expected_tools: vec!["srv.gamma".to_string()],
            },
        ];

        let summary = harness.run(cases).await;

        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        // alpha always ranks first; gamma never appears.
        assert_eq!(summary.top_1_matches, 1);
        assert_eq!(summary.matches, 1);
        assert_eq!(summary.commonly_missed[0].0, "srv.gamma");
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let store = Arc::new(MemoryVectorStore::new());
        let harness = make_harness(Some(Arc::clone(&store)));
        let case = TestCase {
            question: "find alpha".to_string(),
            expected_tools: vec!["srv.alpha".to_string()],
        };

        let first = harness.run(vec![case.clone()]).await;
        assert_eq!(first.cache_hits, 0);

        // Let the background writer land the record.
        for _ in 0..100 {
            if store.len() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.len() > 0, "route result was never cached");

        let second = harness.run(vec![case]).await;
        assert_eq!(second.cache_hits, 1);
    }
}
