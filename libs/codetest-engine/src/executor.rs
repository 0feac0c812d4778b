/// Submission Executor - High-Level Orchestration
///
/// Glue between the dispatcher (runs code) and the evaluator (judges output).
/// It knows nothing about:
/// - How code executes (runner's job)
/// - How outputs are compared (evaluator's job)

use codetest_common::config::ServiceConfig;
use codetest_common::types::{ComparisonPolicy, Report, RunOutcome, Submission};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::evaluator;
use crate::runner::ProcessRunner;

#[derive(Debug, Clone)]
pub struct Executor {
    dispatcher: Dispatcher,
    policy: ComparisonPolicy,
}

impl Executor {
    pub fn new(dispatcher: Dispatcher, policy: ComparisonPolicy) -> Self {
        Self { dispatcher, policy }
    }

    /// Production wiring: local interpreter runner, limits from config
    pub fn from_config(config: &ServiceConfig) -> Self {
        let runner = ProcessRunner::from_config(&config.runner);
        let dispatcher = Dispatcher::new(Arc::new(runner), config.runner.time_limit())
            .with_max_concurrent_runs(config.dispatcher.max_concurrent_runs)
            .with_submission_deadline(config.dispatcher.submission_deadline());

        Self::new(dispatcher, config.comparison)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn policy(&self) -> ComparisonPolicy {
        self.policy
    }

    /// Run every test case of `submission` and judge the results.
    ///
    /// Always produces a report; per-case failures are recorded in its
    /// verdicts rather than returned as errors.
    pub async fn execute(&self, submission_id: Uuid, submission: &Submission) -> Report {
        info!(
            submission_id = %submission_id,
            test_cases = submission.test_cases.len(),
            code_bytes = submission.code.len(),
            "Starting submission"
        );

        let start = Instant::now();
        let outcomes = self.dispatcher.dispatch(submission_id, submission).await;

        for (index, outcome) in outcomes.iter().enumerate() {
            match outcome {
                RunOutcome::InfraError { message } => warn!(
                    submission_id = %submission_id,
                    test_case = index,
                    error = %message,
                    "Infrastructure failure; test case cannot pass"
                ),
                RunOutcome::Timeout => warn!(
                    submission_id = %submission_id,
                    test_case = index,
                    "Execution timed out; test case cannot pass"
                ),
                _ => {}
            }
        }

        let report = evaluator::evaluate(submission, outcomes, self.policy);

        info!(
            submission_id = %submission_id,
            passed = report.passed_indices.len(),
            total = report.verdicts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Submission completed"
        );

        report
    }
}
