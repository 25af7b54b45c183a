//! Local child-process executor.
//!
//! Runs the test command as a direct child of the detector process. No
//! shell is involved: the command is launched from its already-split
//! program and arguments, with the adapter's seed variable set on top of the
//! inherited environment.
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | None (shared working tree, filesystem and network) |
//! | Timeout | Per run; the process group is killed and partial output kept |
//! | Cancellation | In-flight process groups are killed, the run is dropped |
//! | Streaming output | Each captured line logged at DEBUG when enabled |
//!
//! On Unix every run leads its own process group, so a timeout or
//! cancellation also reaches the processes the test command started
//! (`npm test` wrapping `jest`, a shell wrapping `pytest`). Processes that
//! leave the group themselves, such as daemons calling `setsid`, are not
//! tracked.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RunExecutor, RunRequest, RunResult};

/// Executor that runs each request as a local child process.
///
/// # Example
///
/// ```no_run
/// use flaky_detector::executor::{Command, LocalExecutor, RunExecutor, RunRequest};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let executor = LocalExecutor::new().with_env("CI", "1");
/// let request = RunRequest {
///     run_index: 0,
///     seed: 42,
///     command: Command::new("pytest").env("TEST_SEED", "42"),
/// };
/// let result = executor.execute(&request, &CancellationToken::new()).await;
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    env: Vec<(String, String)>,
    stream_output: bool,
}

impl LocalExecutor {
    /// Creates an executor that only adds the per-run environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment variable applied to every run.
    ///
    /// Per-run variables from the [`RunRequest`] take precedence.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Logs every captured output line at DEBUG, tagged with its run index.
    pub fn with_stream_output(mut self, enabled: bool) -> Self {
        self.stream_output = enabled;
        self
    }
}

/// How waiting on a child ended.
enum Waited {
    Exited(ExitStatus),
    CaptureFailed(io::Error),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl RunExecutor for LocalExecutor {
    async fn execute(&self, request: &RunRequest, cancel: &CancellationToken) -> Option<RunResult> {
        let start = Instant::now();
        let cmd = &request.command;
        let (run_index, seed) = (request.run_index, request.seed);

        if cancel.is_cancelled() {
            return None;
        }

        let mut process = tokio::process::Command::new(&cmd.program);
        process.args(&cmd.args);
        if let Some(dir) = &cmd.working_dir {
            process.current_dir(dir);
        }
        for (key, value) in self.env.iter().chain(cmd.env.iter()) {
            process.env(key, value);
        }
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            process.process_group(0);
        }

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(run = run_index, "Failed to launch `{}`: {}", cmd.program, e);
                return Some(
                    RunResult::process_error(
                        run_index,
                        seed,
                        format!("failed to launch `{}`: {}", cmd.program, e),
                    )
                    .with_duration(start.elapsed()),
                );
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, run_index).await;
            return Some(
                RunResult::process_error(run_index, seed, "output pipes were not captured")
                    .with_duration(start.elapsed()),
            );
        };

        let mut out = Vec::new();
        let mut err = Vec::new();
        let echo = self.stream_output;

        let waited = {
            let work = async {
                let (o, e) = tokio::join!(
                    drain(stdout, &mut out, "stdout", run_index, echo),
                    drain(stderr, &mut err, "stderr", run_index, echo),
                );
                match o.and(e) {
                    Ok(()) => child.wait().await,
                    Err(e) => Err(e),
                }
            };
            let bounded = async {
                match cmd.timeout {
                    Some(limit) => tokio::time::timeout(limit, work).await.ok(),
                    None => Some(work.await),
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Waited::Cancelled,
                res = bounded => match res {
                    Some(Ok(status)) => Waited::Exited(status),
                    Some(Err(e)) => Waited::CaptureFailed(e),
                    None => Waited::TimedOut,
                },
            }
        };

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let stderr = String::from_utf8_lossy(&err).into_owned();

        let result = match waited {
            Waited::Exited(status) => {
                debug!(
                    run = run_index,
                    "Run exited with {:?} in {:?}",
                    status.code(),
                    start.elapsed()
                );
                RunResult::completed(run_index, seed, status.code(), stdout, stderr)
            }
            Waited::CaptureFailed(e) => {
                terminate(&mut child, run_index).await;
                warn!(run = run_index, "Failed to capture output: {}", e);
                RunResult::process_error(run_index, seed, format!("failed to capture output: {e}"))
            }
            Waited::TimedOut => {
                terminate(&mut child, run_index).await;
                warn!(run = run_index, "Run timed out after {:?}", start.elapsed());
                RunResult::timed_out(run_index, seed, stdout, stderr)
            }
            Waited::Cancelled => {
                terminate(&mut child, run_index).await;
                debug!(run = run_index, "Run cancelled");
                return None;
            }
        };

        Some(result.with_duration(start.elapsed()))
    }
}

/// Reads `reader` to the end, appending to `buf` line by line.
///
/// Bytes already read stay in `buf` if the future is dropped, which is what
/// keeps the partial output of timed-out runs.
async fn drain<R: AsyncRead + Unpin>(
    reader: R,
    buf: &mut Vec<u8>,
    label: &str,
    run_index: usize,
    echo: bool,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    loop {
        let start = buf.len();
        let n = reader.read_until(b'\n', buf).await?;
        if n == 0 {
            return Ok(());
        }
        if echo {
            let line = String::from_utf8_lossy(&buf[start..]);
            debug!(run = run_index, "[{}] {}", label, line.trim_end());
        }
    }
}

/// Kills the child's process group, then the child itself, and reaps it.
async fn terminate(child: &mut Child, run_index: usize) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id()
            && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
        {
            debug!(run = run_index, "Killing process group {} failed: {}", pid, e);
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(run = run_index, "Kill failed (process already exited?): {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!(run = run_index, "Failed to reap killed process: {}", e);
    }
}
