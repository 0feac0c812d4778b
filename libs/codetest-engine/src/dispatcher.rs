/// Test Case Dispatcher - Fan-Out / Fan-In
///
/// **Core Responsibility:**
/// Start one runner invocation per test case, concurrently, and hand back an
/// index-complete list of outcomes (`outcomes[i]` belongs to test case `i`).
///
/// **Guarantees:**
/// - Completion order never leaks: results are slotted by index
/// - One failing run (any outcome, even a panic) never aborts its siblings
/// - Always returns exactly N outcomes; runs are individually deadline-bound,
///   so the fan-in barrier cannot wait forever
/// - Optional submission-wide deadline: outstanding runs are aborted (their
///   process groups killed) and reported as `Timeout`
/// - Optional process-wide cap on concurrently running children, shared by
///   every submission that goes through this dispatcher

use codetest_common::types::{RunOutcome, Submission};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::runner::Runner;

#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<dyn Runner>,
    time_limit: Duration,
    permits: Option<Arc<Semaphore>>,
    max_concurrent_runs: Option<usize>,
    submission_deadline: Option<Duration>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("time_limit", &self.time_limit)
            .field("max_concurrent_runs", &self.max_concurrent_runs)
            .field("submission_deadline", &self.submission_deadline)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn Runner>, time_limit: Duration) -> Self {
        Self {
            runner,
            time_limit,
            permits: None,
            max_concurrent_runs: None,
            submission_deadline: None,
        }
    }

    pub fn with_max_concurrent_runs(mut self, max: Option<usize>) -> Self {
        self.permits = max.map(|n| Arc::new(Semaphore::new(n)));
        self.max_concurrent_runs = max;
        self
    }

    pub fn with_submission_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.submission_deadline = deadline;
        self
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn max_concurrent_runs(&self) -> Option<usize> {
        self.max_concurrent_runs
    }

    pub fn submission_deadline(&self) -> Option<Duration> {
        self.submission_deadline
    }

    /// Run every test case and collect the outcomes in submission order.
    #[tracing::instrument(
        skip_all,
        fields(submission_id = %submission_id, test_cases = submission.test_cases.len())
    )]
    pub async fn dispatch(&self, submission_id: Uuid, submission: &Submission) -> Vec<RunOutcome> {
        let total = submission.test_cases.len();
        if total == 0 {
            return Vec::new();
        }

        let code: Arc<str> = Arc::from(submission.code.as_str());
        let mut tasks = JoinSet::new();

        for (index, test_case) in submission.test_cases.iter().enumerate() {
            let runner = Arc::clone(&self.runner);
            let code = Arc::clone(&code);
            let input = test_case.input.clone();
            let permits = self.permits.clone();
            let time_limit = self.time_limit;

            tasks.spawn(async move {
                let _permit = match permits {
                    Some(permits) => match permits.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return (index, RunOutcome::infra_error("Runner pool is closed")),
                    },
                    None => None,
                };

                let run = runner.execute(&code, &input, time_limit);
                let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(test_case = index, "Runner panicked");
                        RunOutcome::infra_error("Runner panicked while executing the test case")
                    }
                };

                (index, outcome)
            });
        }

        let mut slots: Vec<Option<RunOutcome>> = vec![None; total];
        let mut received = 0;
        let mut deadline_expired = false;
        let deadline = self.submission_deadline.map(|d| Instant::now() + d);

        while received < total {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        deadline_expired = true;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok((index, outcome))) => {
                    debug!(test_case = index, status = outcome.kind(), "Test case finished");
                    if slots[index].replace(outcome).is_none() {
                        received += 1;
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Runner task failed");
                }
                None => break,
            }
        }

        if deadline_expired {
            warn!(
                outstanding = total - received,
                "Submission deadline elapsed, aborting outstanding runs"
            );
        }
        // Aborted tasks drop their child processes, which kills them
        tasks.abort_all();

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    if deadline_expired {
                        RunOutcome::Timeout
                    } else {
                        RunOutcome::infra_error("Runner task ended without reporting an outcome")
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use codetest_common::types::TestCase;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory runner: input → (delay, outcome).
    /// Unknown inputs echo back as success. `"panic"` panics.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        script: HashMap<String, (Duration, RunOutcome)>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn on(mut self, input: &str, delay_ms: u64, outcome: RunOutcome) -> Self {
            self.script
                .insert(input.to_string(), (Duration::from_millis(delay_ms), outcome));
            self
        }

        pub(crate) fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Runner for ScriptedRunner {
        async fn execute(&self, _code: &str, input: &str, time_limit: Duration) -> RunOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if input == "panic" {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted panic");
            }

            let (delay, outcome) = self
                .script
                .get(input)
                .cloned()
                .unwrap_or((Duration::from_millis(1), RunOutcome::success(input)));

            let outcome = if delay > time_limit {
                tokio::time::sleep(time_limit).await;
                RunOutcome::Timeout
            } else {
                tokio::time::sleep(delay).await;
                outcome
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    pub(crate) fn submission(inputs: &[&str]) -> Submission {
        Submission {
            code: "code".to_string(),
            test_cases: inputs.iter().map(|i| TestCase::new(*i, *i)).collect(),
        }
    }

    #[tokio::test]
    async fn test_outcomes_follow_submission_order() {
        // Case 0 finishes last, case 2 first
        let runner = ScriptedRunner::new()
            .on("a", 150, RunOutcome::success("A"))
            .on("b", 75, RunOutcome::success("B"))
            .on("c", 5, RunOutcome::success("C"));
        let dispatcher = Dispatcher::new(Arc::new(runner), Duration::from_secs(5));

        let outcomes = dispatcher
            .dispatch(Uuid::new_v4(), &submission(&["a", "b", "c"]))
            .await;

        assert_eq!(
            outcomes,
            vec![
                RunOutcome::success("A"),
                RunOutcome::success("B"),
                RunOutcome::success("C"),
            ]
        );
    }

    #[tokio::test]
    async fn test_runs_in_parallel() {
        let mut runner = ScriptedRunner::new();
        let inputs: Vec<String> = (0..8).map(|i| format!("slow{}", i)).collect();
        for input in &inputs {
            runner = runner.on(input, 200, RunOutcome::success("ok"));
        }
        let runner = Arc::new(runner);
        let dispatcher = Dispatcher::new(runner.clone(), Duration::from_secs(5));
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();

        let start = std::time::Instant::now();
        let outcomes = dispatcher.dispatch(Uuid::new_v4(), &submission(&refs)).await;

        assert_eq!(outcomes.len(), 8);
        assert_eq!(runner.peak_concurrency(), 8);
        assert!(start.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let mut runner = ScriptedRunner::new();
        let inputs: Vec<String> = (0..6).map(|i| format!("case{}", i)).collect();
        for input in &inputs {
            runner = runner.on(input, 30, RunOutcome::success("ok"));
        }
        let runner = Arc::new(runner);
        let dispatcher =
            Dispatcher::new(runner.clone(), Duration::from_secs(5)).with_max_concurrent_runs(Some(2));
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();

        let outcomes = dispatcher.dispatch(Uuid::new_v4(), &submission(&refs)).await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(RunOutcome::is_success));
        assert!(runner.peak_concurrency() <= 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let runner = ScriptedRunner::new()
            .on("crash", 5, RunOutcome::runtime_error("Traceback"))
            .on("broken", 5, RunOutcome::infra_error("spawn failed"))
            .on("loop", 10_000, RunOutcome::success("never"));
        let dispatcher = Dispatcher::new(Arc::new(runner), Duration::from_millis(100));

        let outcomes = dispatcher
            .dispatch(
                Uuid::new_v4(),
                &submission(&["crash", "fine", "broken", "loop", "panic"]),
            )
            .await;

        assert_eq!(outcomes[0], RunOutcome::runtime_error("Traceback"));
        assert_eq!(outcomes[1], RunOutcome::success("fine"));
        assert_eq!(outcomes[2], RunOutcome::infra_error("spawn failed"));
        assert_eq!(outcomes[3], RunOutcome::Timeout);
        assert!(matches!(outcomes[4], RunOutcome::InfraError { .. }));
    }

    #[tokio::test]
    async fn test_submission_deadline_times_out_stragglers() {
        let runner = ScriptedRunner::new()
            .on("quick", 5, RunOutcome::success("quick"))
            .on("slow", 2_000, RunOutcome::success("slow"));
        let dispatcher = Dispatcher::new(Arc::new(runner), Duration::from_secs(5))
            .with_submission_deadline(Some(Duration::from_millis(200)));

        let start = std::time::Instant::now();
        let outcomes = dispatcher
            .dispatch(Uuid::new_v4(), &submission(&["quick", "slow"]))
            .await;

        assert_eq!(outcomes, vec![RunOutcome::success("quick"), RunOutcome::Timeout]);
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submission_deadline_kills_running_processes() {
        use crate::runner::ProcessRunner;
        use crate::scratch::ScratchAllocator;

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let marker = outside.path().join("marker");
        let runner = ProcessRunner::new(
            "sh",
            ScratchAllocator::new(Some(root.path().to_path_buf()), "main.sh"),
        );
        let dispatcher = Dispatcher::new(Arc::new(runner), Duration::from_secs(5))
            .with_submission_deadline(Some(Duration::from_millis(300)));
        let sub = Submission {
            code: format!("sleep 1\ntouch '{}'\n", marker.display()),
            test_cases: vec![TestCase::new("", "")],
        };

        let outcomes = dispatcher.dispatch(Uuid::new_v4(), &sub).await;
        assert_eq!(outcomes, vec![RunOutcome::Timeout]);

        // Long enough for a surviving process to have reached `touch`
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!marker.exists(), "aborted run must not keep executing");
        assert!(
            std::fs::read_dir(root.path()).unwrap().next().is_none(),
            "scratch unit must be removed"
        );
    }

    #[tokio::test]
    async fn test_empty_submission() {
        let dispatcher = Dispatcher::new(Arc::new(ScriptedRunner::new()), Duration::from_secs(1));

        let outcomes = dispatcher.dispatch(Uuid::new_v4(), &submission(&[])).await;

        assert!(outcomes.is_empty());
    }
}
