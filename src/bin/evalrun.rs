//! Offline evaluation run.
//!
//! Builds the same collaborators the service uses, drives the configured
//! test-case file through the cache-then-route path, and prints the
//! summary report.

use semroute::evals::harness::{load_test_cases, EvalHarness, HarnessOptions};
use semroute::evals::MetricsEvaluator;
use semroute::{AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semroute=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let test_case_file = config.test_case_file.clone();
    let options = HarnessOptions {
        max_concurrent: config.max_concurrent_requests,
        batch_size: config.batch_size,
        sample_size: config.sample_size,
        metrics_k: config.tool_return_limit,
    };

    let state = AppState::new(config)?;

    let cases = load_test_cases(&test_case_file)?;
    tracing::info!(
        file = %test_case_file.display(),
        cases = cases.len(),
        "Loaded test cases"
    );

    let evaluator = MetricsEvaluator::new(state.router.embedder().provider());
    let harness = EvalHarness::new(
        state.router.clone(),
        state.cache.clone(),
        evaluator,
        options,
    );

    let summary = harness.run(cases).await;
    println!("{}", summary.render());

    Ok(())
}
