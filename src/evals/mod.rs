//! Offline evaluation: per-query quality metrics and the batch harness
//! that grades the live route path against ground-truth tool selections.

pub mod harness;
pub mod metrics;

pub use harness::{EvalHarness, EvalSummary, HarnessOptions, QueryOutcome, TestCase};
pub use metrics::{MetricsEvaluator, MetricsResult};
