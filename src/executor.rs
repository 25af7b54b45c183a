//! Run execution: one subprocess invocation per seed.
//!
//! The [`RunExecutor`] trait is the seam between scheduling and the process
//! that actually runs the test suite. The scheduler hands an executor one
//! [`RunRequest`] at a time and always gets back exactly one [`RunResult`],
//! unless the job was cancelled while the run was in flight.
//!
//! ```text
//! ┌──────────────┐  RunRequest   ┌──────────────────────────────┐
//! │  Scheduler   │──────────────►│  RunExecutor                 │
//! │              │               │  (spawn, capture, timeout)   │
//! │              │◄──────────────│                              │
//! └──────────────┘  RunResult    └──────────────────────────────┘
//! ```
//!
//! # Completion States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Completed` | The process exited on its own, whatever its exit code |
//! | `TimedOut` | The per-run timeout elapsed; the process was killed and partial output kept |
//! | `ProcessError` | The process could not be launched or its output could not be captured |
//!
//! A non-zero exit code is a normal outcome (tests failed) and is still
//! `Completed`.

pub mod local;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use local::LocalExecutor;

/// Errors raised while preparing or launching a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The command line could not be split into program and arguments.
    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    /// The process could not be started.
    #[error("Failed to launch process: {0}")]
    Spawn(String),

    /// The process started but its output could not be read.
    #[error("Failed to capture output: {0}")]
    Capture(String),
}

/// A command to execute for one run.
///
/// # Example
///
/// ```
/// use flaky_detector::executor::Command;
///
/// let cmd = Command::new("pytest")
///     .arg("-v")
///     .env("TEST_SEED", "42")
///     .working_dir("/app");
///
/// assert_eq!(cmd.program, "pytest");
/// assert_eq!(cmd.to_shell_string(), "pytest -v");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The program/executable to run.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Environment variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Maximum execution time; the process is killed when it elapses.
    pub timeout: Option<Duration>,
}

impl Command {
    /// Creates a new command with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Splits a shell-style command line into a command.
    ///
    /// Quoting is honoured but no shell is involved at execution time, so
    /// pipes and redirects are passed through as literal arguments. Wrap the
    /// line in `sh -c '...'` when shell features are needed.
    ///
    /// # Example
    ///
    /// ```
    /// use flaky_detector::executor::Command;
    ///
    /// let cmd = Command::from_shell("pytest 'tests/a b.py' -x").unwrap();
    /// assert_eq!(cmd.args, vec!["tests/a b.py", "-x"]);
    /// ```
    pub fn from_shell(line: &str) -> Result<Self, ExecError> {
        let mut parts = shell_words::split(line)
            .map_err(|e| ExecError::InvalidCommand(format!("{line}: {e}")))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| ExecError::InvalidCommand("empty command".to_string()))?;
        Ok(Self::new(program).args(parts))
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable. Later values override earlier ones.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the execution timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Renders the program and arguments as a shell-quoted string.
    pub fn to_shell_string(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Completed,
    TimedOut,
    ProcessError,
}

/// Everything captured from one run of the test command.
///
/// Created exactly once per scheduled run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Index of the run in `0..runs`.
    pub run_index: usize,

    /// Seed passed to the test process.
    pub seed: u64,

    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,

    /// Wall-clock time of the run.
    pub duration: Duration,

    /// Captured standard output (partial for timed-out runs).
    pub stdout: String,

    /// Captured standard error (partial for timed-out runs).
    pub stderr: String,

    /// How the run ended.
    pub state: CompletionState,

    /// Launch or capture failure description for `ProcessError` runs.
    pub error: Option<String>,
}

impl RunResult {
    /// A run whose process exited on its own.
    pub fn completed(
        run_index: usize,
        seed: u64,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            run_index,
            seed,
            exit_code,
            duration: Duration::ZERO,
            stdout,
            stderr,
            state: CompletionState::Completed,
            error: None,
        }
    }

    /// A run killed after exceeding its timeout, with whatever it printed.
    pub fn timed_out(run_index: usize, seed: u64, stdout: String, stderr: String) -> Self {
        Self {
            state: CompletionState::TimedOut,
            ..Self::completed(run_index, seed, None, stdout, stderr)
        }
    }

    /// A run that could not be launched or captured.
    pub fn process_error(run_index: usize, seed: u64, error: impl Into<String>) -> Self {
        Self {
            state: CompletionState::ProcessError,
            error: Some(error.into()),
            ..Self::completed(run_index, seed, None, String::new(), String::new())
        }
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Returns `true` if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.state == CompletionState::Completed && self.exit_code == Some(0)
    }
}

/// One scheduled invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_index: usize,
    pub seed: u64,
    pub command: Command,
}

/// Executes a single run of the test command.
///
/// Implementations must return exactly one [`RunResult`] per request, mapping
/// every failure onto a [`CompletionState`] instead of an error. The only
/// exception is cancellation: when `cancel` fires while the run is in flight,
/// the process is terminated and `None` is returned, since a cancelled run
/// is not part of the sample.
///
/// # Thread Safety
///
/// Executors are shared by all scheduler workers and must be `Send + Sync`.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, request: &RunRequest, cancel: &CancellationToken) -> Option<RunResult>;
}
