/// Isolated Runner - Execute One (Code, Input) Pair
///
/// **Core Responsibility:**
/// Run the submitted code once against one stdin payload and return exactly
/// one `RunOutcome`, never taking longer than the time limit.
///
/// **Critical Architectural Boundary:**
/// - Runner knows HOW to execute (subprocess today, container/VM tomorrow)
/// - Runner does NOT know about test cases or expected outputs
/// - Runner does NOT decide pass/fail
///
/// **Classification:**
/// - scratch unit cannot be created, code cannot be written,
///   interpreter cannot be started, output cannot be collected → `InfraError`
/// - deadline elapsed (or CPU rlimit hit) → `Timeout`
/// - non-zero exit, death by signal, anything on stderr,
///   or output over the capture limit → `RuntimeError`
/// - clean exit with silent stderr → `Success` carrying stdout verbatim

use async_trait::async_trait;
use codetest_common::config::RunnerConfig;
use codetest_common::types::RunOutcome;
use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use crate::scratch::{ScratchAllocator, ScratchUnit};

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const READ_CHUNK_BYTES: usize = 8192;

/// Execution backend for a single run.
///
/// Implementations must always return an outcome; failures of the backend
/// itself are reported as `RunOutcome::InfraError`, not as panics.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn execute(&self, code: &str, input: &str, time_limit: Duration) -> RunOutcome;
}

#[derive(Debug, Error)]
enum RunnerError {
    #[error("Could not create scratch unit for code: {0}")]
    CreateScratch(#[source] io::Error),
    #[error("Could not write code to scratch unit: {0}")]
    WriteCode(#[source] io::Error),
    #[error("Failed to start interpreter '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to collect process output: {0}")]
    Collect(#[source] io::Error),
}

/// Runs code with a local interpreter in a throwaway directory.
///
/// The child gets a cleared environment (only `PATH`), its own process group
/// and optional rlimits. The whole group is SIGKILLed when the run ends,
/// so background processes started by the code never outlive the call.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    interpreter_args: Vec<String>,
    allocator: ScratchAllocator,
    memory_limit_mb: Option<u64>,
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, allocator: ScratchAllocator) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
            allocator,
            memory_limit_mb: None,
            max_output_bytes: RunnerConfig::default().max_output_bytes,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let allocator = ScratchAllocator::new(config.scratch_dir.clone(), &config.script_name);
        Self::new(&config.interpreter, allocator)
            .with_args(config.interpreter_args.clone())
            .with_memory_limit_mb(config.memory_limit_mb)
            .with_max_output_bytes(config.max_output_bytes)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: Option<u64>) -> Self {
        self.memory_limit_mb = limit;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    #[tracing::instrument(
        skip_all,
        fields(interpreter = %self.interpreter, time_limit_ms = time_limit.as_millis() as u64)
    )]
    async fn run(&self, code: &str, input: &str, time_limit: Duration) -> RunOutcome {
        let start = Instant::now();

        let result = match self.allocator.allocate() {
            Ok(scratch) => {
                let result = self.run_in(&scratch, code, input, time_limit).await;
                scratch.release();
                result
            }
            Err(e) => Err(RunnerError::CreateScratch(e)),
        };

        let outcome = result.unwrap_or_else(|e| {
            warn!(error = %e, "Run failed before producing an outcome");
            RunOutcome::infra_error(e.to_string())
        });

        debug!(
            status = outcome.kind(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run finished"
        );

        outcome
    }

    async fn run_in(
        &self,
        scratch: &ScratchUnit,
        code: &str,
        input: &str,
        time_limit: Duration,
    ) -> Result<RunOutcome, RunnerError> {
        scratch.write_code(code).await.map_err(RunnerError::WriteCode)?;

        let path = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(FALLBACK_PATH));

        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.interpreter_args)
            .arg(scratch.script_path())
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            apply_rlimits(&mut command, self.memory_limit_mb, time_limit);
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        // Set up immediately after spawn: kills the group on every exit path
        let group = ProcessGroupGuard::new(child.id());

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max_output = self.max_output_bytes;

        let collect = async {
            let wait = async {
                let status = child.wait().await;
                // Leftover descendants would keep the pipes open; reap them now
                group.kill();
                status
            };

            let (status, out, err, ()) = tokio::join!(
                wait,
                read_capped(stdout, max_output),
                read_capped(stderr, max_output),
                feed_stdin(stdin, input.as_bytes()),
            );

            Ok::<_, io::Error>((status?, out?, err?))
        };

        let result = tokio::time::timeout(time_limit, collect).await;

        match result {
            Ok(Ok((status, stdout, stderr))) => Ok(classify(status, stdout, stderr, max_output)),
            Ok(Err(e)) => Err(RunnerError::Collect(e)),
            Err(_) => {
                debug!("Deadline elapsed, killing process group");
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                Ok(RunOutcome::Timeout)
            }
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn execute(&self, code: &str, input: &str, time_limit: Duration) -> RunOutcome {
        self.run(code, input, time_limit).await
    }
}

/// SIGKILLs the child's process group when dropped or asked to.
///
/// Fires at most once: after the first kill the id may be recycled by an
/// unrelated process group, so the guard disarms itself.
struct ProcessGroupGuard {
    // 0 once disarmed
    pgid: AtomicU32,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: AtomicU32::new(pid.unwrap_or(0)),
        }
    }

    fn kill(&self) {
        let pgid = self.pgid.swap(0, Ordering::SeqCst);
        if pgid == 0 {
            return;
        }

        #[cfg(unix)]
        {
            if let Ok(pgid) = libc::pid_t::try_from(pgid) {
                // ESRCH once the group is gone is expected and ignored
                unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                }
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn apply_rlimits(command: &mut Command, memory_limit_mb: Option<u64>, time_limit: Duration) {
    let memory_bytes = memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024));
    let cpu_secs = (time_limit.as_secs() + u64::from(time_limit.subsec_nanos() > 0)).max(1);

    unsafe {
        command.pre_exec(move || {
            if let Some(bytes) = memory_bytes {
                let limit = libc::rlimit {
                    rlim_cur: bytes as libc::rlim_t,
                    rlim_max: bytes as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            // Soft limit raises SIGXCPU, hard limit one second later is SIGKILL
            let cpu = libc::rlimit {
                rlim_cur: cpu_secs as libc::rlim_t,
                rlim_max: (cpu_secs + 1) as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(())
        });
    }
}

async fn feed_stdin(stdin: Option<ChildStdin>, input: &[u8]) {
    let Some(mut stdin) = stdin else {
        return;
    };

    if let Err(e) = stdin.write_all(input).await {
        // The program is free to exit without reading its input
        if e.kind() != io::ErrorKind::BrokenPipe {
            debug!(error = %e, "Failed to write stdin");
        }
    }
    // Dropping the handle closes the pipe so the program sees EOF
}

#[derive(Debug, Default)]
struct CapturedStream {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedStream {
    fn into_text(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Read to EOF, keeping at most `cap` bytes. The rest is drained so the
/// writer never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> io::Result<CapturedStream>
where
    R: AsyncRead + Unpin,
{
    let mut captured = CapturedStream::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };

    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(captured)
}

fn classify(
    status: ExitStatus,
    stdout: CapturedStream,
    stderr: CapturedStream,
    max_output: usize,
) -> RunOutcome {
    if killed_by_cpu_limit(&status) {
        return RunOutcome::Timeout;
    }

    let truncated = stdout.truncated || stderr.truncated;
    let out = stdout.into_text();
    let err = stderr.into_text();

    if status.success() && err.is_empty() && !truncated {
        return RunOutcome::Success { output: out };
    }

    // Streams are captured separately, so stderr follows all of stdout
    // rather than interleaving in write order
    let mut message = out;
    message.push_str(&err);
    if truncated {
        message.push_str(&format!("\n[output limit of {} bytes exceeded]", max_output));
    } else if message.is_empty() {
        message = format!("[{}]", describe_status(&status));
    }

    RunOutcome::RuntimeError { message }
}

#[cfg(unix)]
fn killed_by_cpu_limit(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGXCPU)
}

#[cfg(not(unix))]
fn killed_by_cpu_limit(_status: &ExitStatus) -> bool {
    false
}

fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status: {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }

    status.to_string()
}
