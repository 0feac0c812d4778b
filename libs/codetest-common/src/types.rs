use serde::{Deserialize, Serialize};

/// One input/expected-output pair. Identified by its position in the submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(rename = "output", alias = "expected_output")]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(alias = "Code")]
    pub code: String,
    pub test_cases: Vec<TestCase>,
}

/// Raw result of running the code against one input.
///
/// Produced exactly once per test case by a runner. The evaluator never adds
/// categories of its own; it only decides whether a `Success` matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { output: String },
    Timeout,
    RuntimeError { message: String },
    InfraError { message: String },
}

impl RunOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        RunOutcome::Success {
            output: output.into(),
        }
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        RunOutcome::RuntimeError {
            message: message.into(),
        }
    }

    pub fn infra_error(message: impl Into<String>) -> Self {
        RunOutcome::InfraError {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    /// Captured text: program output on success, error detail otherwise.
    pub fn output(&self) -> &str {
        match self {
            RunOutcome::Success { output } => output,
            RunOutcome::RuntimeError { message } | RunOutcome::InfraError { message } => message,
            RunOutcome::Timeout => "",
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunOutcome::Success { .. } => "success",
            RunOutcome::Timeout => "timeout",
            RunOutcome::RuntimeError { .. } => "runtime_error",
            RunOutcome::InfraError { .. } => "infra_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "test_case")]
    pub test_case_index: usize,
    pub passed: bool,
    pub outcome: RunOutcome,
}

/// Final answer for one submission.
///
/// `verdicts[i].test_case_index == i` for every `i`, and `passed_indices` is
/// ascending and lists exactly the verdicts with `passed = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "passed")]
    pub passed_indices: Vec<usize>,
    #[serde(rename = "results")]
    pub verdicts: Vec<Verdict>,
}

impl Report {
    pub fn all_passed(&self) -> bool {
        self.passed_indices.len() == self.verdicts.len()
    }
}

/// How a successful run's output is compared with the expected output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonPolicy {
    /// Literal equality. Trailing newlines and whitespace are significant.
    #[default]
    Exact,
    /// Ignore trailing `\n` / `\r\n` on both sides.
    TrimTrailingNewlines,
    /// Ignore leading and trailing whitespace on both sides.
    Trim,
}

impl ComparisonPolicy {
    pub fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            ComparisonPolicy::Exact => actual == expected,
            ComparisonPolicy::TrimTrailingNewlines => {
                actual.trim_end_matches(['\n', '\r']) == expected.trim_end_matches(['\n', '\r'])
            }
            ComparisonPolicy::Trim => actual.trim() == expected.trim(),
        }
    }
}

impl std::str::FromStr for ComparisonPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(ComparisonPolicy::Exact),
            "trim_trailing_newlines" => Ok(ComparisonPolicy::TrimTrailingNewlines),
            "trim" => Ok(ComparisonPolicy::Trim),
            other => Err(format!(
                "unknown comparison policy '{}' (expected exact, trim_trailing_newlines or trim)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_accepts_original_field_names() {
        let body = r#"{"Code": "print(1)", "test_cases": [{"input": "2", "output": "3"}]}"#;
        let submission: Submission = serde_json::from_str(body).unwrap();

        assert_eq!(submission.code, "print(1)");
        assert_eq!(submission.test_cases, vec![TestCase::new("2", "3")]);
    }

    #[test]
    fn test_test_case_aliases_and_defaults() {
        let tc: TestCase = serde_json::from_str(r#"{"expected_output": "ok"}"#).unwrap();
        assert_eq!(tc.input, "");
        assert_eq!(tc.expected_output, "ok");
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(RunOutcome::success("3\n")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "success", "output": "3\n"}));

        let json = serde_json::to_value(RunOutcome::Timeout).unwrap();
        assert_eq!(json, serde_json::json!({"status": "timeout"}));

        let json = serde_json::to_value(RunOutcome::runtime_error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "runtime_error", "message": "boom"}));
    }

    #[test]
    fn test_report_wire_format() {
        let report = Report {
            passed_indices: vec![0],
            verdicts: vec![Verdict {
                test_case_index: 0,
                passed: true,
                outcome: RunOutcome::success("3"),
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["passed"], serde_json::json!([0]));
        assert_eq!(json["results"][0]["test_case"], 0);
        assert_eq!(json["results"][0]["outcome"]["status"], "success");
        assert!(report.all_passed());
    }

    #[test]
    fn test_outcome_output_accessor() {
        assert_eq!(RunOutcome::success("x").output(), "x");
        assert_eq!(RunOutcome::infra_error("disk full").output(), "disk full");
        assert_eq!(RunOutcome::Timeout.output(), "");
        assert_eq!(RunOutcome::Timeout.kind(), "timeout");
    }

    #[test]
    fn test_exact_comparison_is_literal() {
        let policy = ComparisonPolicy::Exact;
        assert!(policy.matches("3", "3"));
        assert!(!policy.matches("3\n", "3"));
        assert!(!policy.matches("3 ", "3"));
        assert!(!policy.matches("Hello", "hello"));
    }

    #[test]
    fn test_relaxed_comparisons() {
        assert!(ComparisonPolicy::TrimTrailingNewlines.matches("3\r\n", "3"));
        assert!(!ComparisonPolicy::TrimTrailingNewlines.matches("3 \n", "3"));
        assert!(ComparisonPolicy::Trim.matches("  3 \n", "3"));
        assert!(!ComparisonPolicy::Trim.matches("a b", "a  b"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("EXACT".parse::<ComparisonPolicy>(), Ok(ComparisonPolicy::Exact));
        assert_eq!("trim".parse::<ComparisonPolicy>(), Ok(ComparisonPolicy::Trim));
        assert!("fuzzy".parse::<ComparisonPolicy>().is_err());
    }
}
