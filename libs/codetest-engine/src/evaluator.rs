/// Verdict Aggregator - Language-Agnostic Judging
///
/// **Core Responsibility:**
/// Compare raw run outcomes against expected outputs and assemble the Report.
///
/// **Critical Properties:**
/// - Knows nothing about processes, interpreters or scratch units
/// - Pure function: (test cases, outcomes, policy) → Report
/// - Never invents failure categories; only decides `passed`
///
/// **Judging Rules:**
/// - `passed` iff the outcome is `Success` and its output matches the
///   expected output under the configured `ComparisonPolicy`
/// - The default policy is `Exact`: no trimming, `"3\n"` does not match `"3"`
/// - `verdicts[i]` always describes test case `i`
/// - `passed_indices` is ascending

use codetest_common::types::{ComparisonPolicy, Report, RunOutcome, Submission, TestCase, Verdict};
use tracing::debug;

/// Judge a single test case outcome
pub fn evaluate_test(
    index: usize,
    outcome: RunOutcome,
    test_case: &TestCase,
    policy: ComparisonPolicy,
) -> Verdict {
    let passed = match &outcome {
        RunOutcome::Success { output } => policy.matches(output, &test_case.expected_output),
        _ => false,
    };

    Verdict {
        test_case_index: index,
        passed,
        outcome,
    }
}

/// Build the report for `test_cases` from index-aligned `outcomes`.
///
/// Produces exactly one verdict per test case. A missing outcome becomes an
/// `InfraError` verdict; surplus outcomes are ignored.
pub fn aggregate_results(
    test_cases: &[TestCase],
    outcomes: Vec<RunOutcome>,
    policy: ComparisonPolicy,
) -> Report {
    let mut outcomes = outcomes.into_iter();
    let mut verdicts = Vec::with_capacity(test_cases.len());
    let mut passed_indices = Vec::new();

    for (index, test_case) in test_cases.iter().enumerate() {
        let outcome = outcomes
            .next()
            .unwrap_or_else(|| RunOutcome::infra_error("No outcome was recorded for this test case"));

        let verdict = evaluate_test(index, outcome, test_case, policy);

        debug!(
            test_case = index,
            status = verdict.outcome.kind(),
            passed = verdict.passed,
            "Evaluated test case"
        );

        if verdict.passed {
            passed_indices.push(index);
        }
        verdicts.push(verdict);
    }

    Report {
        passed_indices,
        verdicts,
    }
}

/// Main entry point: judge all outcomes of a submission.
pub fn evaluate(submission: &Submission, outcomes: Vec<RunOutcome>, policy: ComparisonPolicy) -> Report {
    aggregate_results(&submission.test_cases, outcomes, policy)
}
