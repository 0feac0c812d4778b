// Service configuration for codetest
// Loaded from a JSON file, then overridden by environment variables

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ComparisonPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/codetest.json";
pub const CONFIG_PATH_ENV: &str = "CODETEST_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub runner: RunnerConfig,
    pub dispatcher: DispatcherConfig,
    pub comparison: ComparisonPolicy,
    pub limits: SubmissionLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub script_name: String,
    pub time_limit_ms: u64,
    pub memory_limit_mb: Option<u64>,
    pub max_output_bytes: usize,
    /// Parent directory for scratch units; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Process-wide cap on simultaneously running children. Unbounded when unset.
    pub max_concurrent_runs: Option<usize>,
    pub submission_deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionLimits {
    pub max_code_bytes: usize,
    pub max_input_bytes: usize,
    pub max_test_cases: usize,
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_string(),
            runner: RunnerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            comparison: ComparisonPolicy::default(),
            limits: SubmissionLimits::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: Vec::new(),
            script_name: "main.py".to_string(),
            time_limit_ms: 5000,
            memory_limit_mb: None,
            max_output_bytes: 1024 * 1024,
            scratch_dir: None,
        }
    }
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: 1024 * 1024,
            max_input_bytes: 10 * 1024 * 1024,
            max_test_cases: 256,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl RunnerConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

impl DispatcherConfig {
    pub fn submission_deadline(&self) -> Option<Duration> {
        self.submission_deadline_ms.map(Duration::from_millis)
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Resolve the full configuration for a process:
    /// `$CODETEST_CONFIG` (must exist) or `config/codetest.json` (optional),
    /// then environment overrides, then validation.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEY=value` overrides from `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(interpreter) = lookup("INTERPRETER") {
            self.runner.interpreter = interpreter;
        }
        if let Some(value) = lookup("TIME_LIMIT_MS") {
            self.runner.time_limit_ms = parse_var("TIME_LIMIT_MS", &value)?;
        }
        if let Some(value) = lookup("MEMORY_LIMIT_MB") {
            self.runner.memory_limit_mb = Some(parse_var("MEMORY_LIMIT_MB", &value)?);
        }
        if let Some(dir) = lookup("SCRATCH_DIR") {
            self.runner.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("MAX_CONCURRENT_RUNS") {
            self.dispatcher.max_concurrent_runs = Some(parse_var("MAX_CONCURRENT_RUNS", &value)?);
        }
        if let Some(value) = lookup("SUBMISSION_DEADLINE_MS") {
            self.dispatcher.submission_deadline_ms =
                Some(parse_var("SUBMISSION_DEADLINE_MS", &value)?);
        }
        if let Some(value) = lookup("OUTPUT_COMPARISON") {
            self.comparison = value
                .parse()
                .map_err(|e: String| anyhow::anyhow!("Invalid OUTPUT_COMPARISON: {}", e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.runner.interpreter.trim().is_empty() {
            bail!("runner.interpreter must not be empty");
        }
        if self.runner.script_name.trim().is_empty() || self.runner.script_name.contains('/') {
            bail!("runner.script_name must be a plain file name");
        }
        if self.runner.time_limit_ms == 0 {
            bail!("runner.time_limit_ms must be greater than zero");
        }
        if self.runner.memory_limit_mb == Some(0) {
            bail!("runner.memory_limit_mb must be greater than zero when set");
        }
        if self.dispatcher.max_concurrent_runs == Some(0) {
            bail!("dispatcher.max_concurrent_runs must be greater than zero when set");
        }
        if self.dispatcher.submission_deadline_ms == Some(0) {
            bail!("dispatcher.submission_deadline_ms must be greater than zero when set");
        }
        if self.limits.max_test_cases == 0 || self.limits.max_body_bytes == 0 {
            bail!("limits must be greater than zero");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, value, e))
}
