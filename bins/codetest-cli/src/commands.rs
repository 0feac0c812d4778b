// CLI commands for codetest
use anyhow::{bail, Context, Result};
use codetest_common::config::{ServiceConfig, DEFAULT_CONFIG_PATH};
use codetest_common::types::{Report, RunOutcome, Submission, TestCase};
use codetest_engine::Executor;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Read the source file and the test case array into a submission
pub fn load_submission(code_path: &Path, cases_path: &Path) -> Result<Submission> {
    let code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read code file: {}", code_path.display()))?;

    let content = fs::read_to_string(cases_path)
        .with_context(|| format!("Failed to read test cases: {}", cases_path.display()))?;
    let test_cases: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test cases: {}", cases_path.display()))?;

    Ok(Submission { code, test_cases })
}

/// Explicit path wins; otherwise the same resolution the server uses
pub fn resolve_config(config_path: Option<&Path>) -> Result<ServiceConfig> {
    match config_path {
        Some(path) => {
            let mut config = ServiceConfig::load(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => ServiceConfig::from_env(),
    }
}

pub async fn execute_local(submission: &Submission, config: &ServiceConfig) -> Report {
    let executor = Executor::from_config(config);
    executor.execute(Uuid::new_v4(), submission).await
}

pub async fn run_submission(
    code_path: &Path,
    cases_path: &Path,
    config_path: Option<&Path>,
    strict: bool,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let submission = load_submission(code_path, cases_path)?;

    eprintln!(
        "→ Running {} test case(s) with {} (time limit {}ms)",
        submission.test_cases.len(),
        config.runner.interpreter,
        config.runner.time_limit_ms
    );

    let report = execute_local(&submission, &config).await;

    for verdict in &report.verdicts {
        let mark = if verdict.passed { "✓" } else { "✗" };
        let detail = match &verdict.outcome {
            RunOutcome::Success { .. } if verdict.passed => "passed".to_string(),
            RunOutcome::Success { output } => format!("output mismatch (got {:?})", output),
            RunOutcome::Timeout => "timed out".to_string(),
            RunOutcome::RuntimeError { message } => {
                format!("runtime error: {}", message.lines().last().unwrap_or(""))
            }
            RunOutcome::InfraError { message } => format!("infrastructure error: {}", message),
        };
        eprintln!("  {} Test {}: {}", mark, verdict.test_case_index, detail);
    }
    eprintln!(
        "→ {} / {} passed",
        report.passed_indices.len(),
        report.verdicts.len()
    );

    println!("{}", serde_json::to_string_pretty(&report)?);

    if strict && !report.all_passed() {
        bail!(
            "{} of {} test case(s) failed",
            report.verdicts.len() - report.passed_indices.len(),
            report.verdicts.len()
        );
    }

    Ok(())
}

/// Initialize a project directory with a default configuration
pub fn init_project(path: &str) -> Result<()> {
    println!("Initializing codetest project at: {}", path);

    let config_path = Path::new(path).join(DEFAULT_CONFIG_PATH);
    if config_path.exists() {
        println!("  Skipped: {} already exists", DEFAULT_CONFIG_PATH);
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json_content = serde_json::to_string_pretty(&ServiceConfig::default())?;
    fs::write(&config_path, json_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("  Created: {}", DEFAULT_CONFIG_PATH);

    Ok(())
}
