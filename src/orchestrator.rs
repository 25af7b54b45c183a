//! Detection job orchestration.
//!
//! A job turns a [`JobInput`] into a [`Report`]:
//!
//! ```text
//!   JobInput + JobSettings
//!          │
//!          │ RunConfig::new()        validate, detect, resolve command, seeds
//!          ▼                         (ConfigError / DetectionError end here,
//!      RunConfig                      before any process is launched)
//!          │
//!          │ requests()
//!          ▼
//!   Vec<RunRequest> ──► Scheduler ──► RunExecutor (× parallelism)
//!                           │
//!                           ▼
//!                    Vec<RunResult>   (barrier: all launched runs finished)
//!                           │
//!                           │ adapter.parse()
//!                           ▼
//!                   Vec<RunOutcomes> ──► aggregate() ──► build_report()
//!                                                             │
//!                                                             ▼
//!                                                          Reporter
//! ```
//!
//! Failures of a single run (timeouts, launch errors) and malformed output
//! records never abort the job; they are counted in the report's metadata.
//!
//! # Example
//!
//! ```no_run
//! use flaky_detector::config::JobInput;
//! use flaky_detector::executor::LocalExecutor;
//! use flaky_detector::orchestrator::{JobSettings, Orchestrator};
//! use flaky_detector::report::ConsoleReporter;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let input = JobInput::new("pytest tests/", 20, 4);
//!     let orchestrator = Orchestrator::new(LocalExecutor::new(), ConsoleReporter::new(false));
//!
//!     let report = orchestrator
//!         .run_job(&input, &JobSettings::default(), &CancellationToken::new())
//!         .await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod scheduler;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use scheduler::{ScheduleOutcome, Scheduler};

use crate::aggregate::{RunOutcomes, aggregate};
use crate::config::{ConfigError, DetectorConfig, IgnoreFilter, JobInput};
use crate::executor::{Command, RunExecutor, RunRequest};
use crate::framework::{
    DetectionError, FrameworkAdapter, ParseWarning, detect_framework, truncate_message,
};
use crate::report::{JobMetadata, Report, Reporter, build_report};
use crate::seed::{SeedGenerator, SeedRange};

/// Environment variable carrying the run index into every run.
pub const RUN_INDEX_ENV: &str = "ATTEMPT";

/// Errors that stop a job before any run is launched.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Detection(#[from] DetectionError),
}

/// Job settings that are not part of the job input contract.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Directory the suite runs in and detection probes.
    pub working_dir: PathBuf,
    /// Per-run timeout.
    pub run_timeout: Option<Duration>,
    /// Deadline for the whole job.
    pub job_timeout: Option<Duration>,
    /// Base for generated seeds; drawn at random when absent.
    pub base_seed: Option<u64>,
    pub seed_range: SeedRange,
    pub ignore_patterns: Vec<String>,
    pub max_error_length: usize,
    /// Keep each run's stdout and stderr in the report.
    pub save_full_output: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            run_timeout: Some(Duration::from_secs(300)),
            job_timeout: None,
            base_seed: None,
            seed_range: SeedRange::default(),
            ignore_patterns: Vec::new(),
            max_error_length: 200,
            save_full_output: false,
        }
    }
}

impl JobSettings {
    /// Takes the settings from a loaded configuration.
    pub fn from_config(config: &DetectorConfig) -> anyhow::Result<Self> {
        Ok(Self {
            working_dir: config.resolved_working_dir()?,
            run_timeout: Some(Duration::from_secs(config.timeout_secs)),
            job_timeout: config.job_timeout_secs.map(Duration::from_secs),
            base_seed: config.base_seed,
            seed_range: config.seed_range,
            ignore_patterns: config.ignore_patterns.clone(),
            max_error_length: config.max_error_length,
            save_full_output: config.save_full_output,
        })
    }
}

/// A validated job, ready to schedule.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub adapter: &'static FrameworkAdapter,
    /// The test command wrapped in the adapter's run template.
    pub command: Command,
    /// Directory every run is launched in.
    pub working_dir: PathBuf,
    pub runs: usize,
    pub parallelism: usize,
    /// One seed per run, indexed by run.
    pub seeds: Vec<u64>,
    /// Base of generated seeds; `None` when the seed list was explicit.
    pub base_seed: Option<u64>,
    pub job_timeout: Option<Duration>,
    pub ignore: IgnoreFilter,
    pub max_error_length: usize,
    pub save_full_output: bool,
}

impl RunConfig {
    /// Validates `input`, resolves the framework and fixes every seed.
    ///
    /// # Errors
    ///
    /// [`JobError::Config`] for invalid counts, seed list, seed range,
    /// ignore pattern or command; [`JobError::Detection`] when no adapter
    /// applies. Nothing is launched in either case.
    pub fn new(input: &JobInput, settings: &JobSettings) -> Result<Self, JobError> {
        input.validate()?;
        if settings.seed_range.min > settings.seed_range.max {
            return Err(ConfigError::InvalidSeedRange {
                min: settings.seed_range.min,
                max: settings.seed_range.max,
            }
            .into());
        }
        let ignore = IgnoreFilter::new(settings.ignore_patterns.as_slice())?;

        let adapter = detect_framework(&settings.working_dir, input.framework.as_deref())?;

        let mut command = Command::from_shell(&adapter.resolve_command(&input.test_command))
            .map_err(|e| ConfigError::InvalidCommand(e.to_string()))?
            .working_dir(&settings.working_dir);
        if let Some(timeout) = settings.run_timeout {
            command = command.timeout(timeout);
        }

        let (seeds, base_seed) = match &input.seed_list {
            Some(seeds) => (seeds.clone(), None),
            None => {
                let generator = match settings.base_seed {
                    Some(base) => SeedGenerator::new(base, settings.seed_range),
                    None => SeedGenerator::from_entropy(settings.seed_range),
                };
                (generator.seeds(input.runs), Some(generator.base()))
            }
        };

        Ok(Self {
            adapter,
            command,
            working_dir: settings.working_dir.clone(),
            runs: input.runs,
            parallelism: input.parallelism,
            seeds,
            base_seed,
            job_timeout: settings.job_timeout,
            ignore,
            max_error_length: settings.max_error_length,
            save_full_output: settings.save_full_output,
        })
    }

    /// The request for one run: the command plus its seed and index
    /// variables.
    pub fn request(&self, run_index: usize) -> RunRequest {
        let seed = self.seeds[run_index];
        RunRequest {
            run_index,
            seed,
            command: self
                .command
                .clone()
                .env(self.adapter.seed_env, seed.to_string())
                .env(RUN_INDEX_ENV, run_index.to_string()),
        }
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        (0..self.runs).map(|i| self.request(i)).collect()
    }

    /// The adapter's dependency install command, run in the same directory
    /// as the tests.
    pub fn install_command(&self) -> Result<Command, ConfigError> {
        let mut command = Command::from_shell(self.adapter.install_command)
            .map_err(|e| ConfigError::InvalidCommand(e.to_string()))?;
        command = command.working_dir(&self.working_dir);
        if let Some(timeout) = self.command.timeout {
            command = command.timeout(timeout);
        }
        Ok(command)
    }
}

/// Runs detection jobs with an executor and a reporter.
pub struct Orchestrator<E, R> {
    executor: E,
    reporter: R,
}

impl<E, R> Orchestrator<E, R>
where
    E: RunExecutor,
    R: Reporter,
{
    pub fn new(executor: E, reporter: R) -> Self {
        Self { executor, reporter }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Validates and runs a job.
    ///
    /// # Errors
    ///
    /// See [`RunConfig::new`]. Once runs start, the job always produces a
    /// report.
    pub async fn run_job(
        &self,
        input: &JobInput,
        settings: &JobSettings,
        cancel: &CancellationToken,
    ) -> Result<Report, JobError> {
        let config = RunConfig::new(input, settings)?;
        Ok(self.run(&config, cancel).await)
    }

    /// Runs the adapter's install command once. Returns whether it
    /// succeeded; a failure is logged and the job may still proceed.
    pub async fn install(&self, config: &RunConfig, cancel: &CancellationToken) -> bool {
        let command = match config.install_command() {
            Ok(command) => command,
            Err(e) => {
                warn!("Skipping install step: {}", e);
                return false;
            }
        };
        info!("Installing dependencies: {}", command.to_shell_string());

        let request = RunRequest {
            run_index: 0,
            seed: 0,
            command,
        };
        match self.executor.execute(&request, cancel).await {
            Some(result) if result.success() => true,
            Some(result) => {
                warn!(
                    "Install command failed ({:?}, exit code {:?}); continuing with the test runs",
                    result.state, result.exit_code
                );
                if !result.stderr.is_empty() {
                    debug!("Install stderr:\n{}", result.stderr);
                }
                false
            }
            None => false,
        }
    }

    /// Runs a validated job to completion or cancellation.
    pub async fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> Report {
        let job_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Job {}: {} runs of `{}` ({}), parallelism {}",
            job_id,
            config.runs,
            config.command.to_shell_string(),
            config.adapter.id,
            config.parallelism
        );
        if let Some(base) = config.base_seed {
            info!("Base seed {}", base);
        }
        self.reporter
            .on_job_start(config.adapter.id, config.runs)
            .await;

        let job_cancel = cancel.child_token();
        let deadline = config.job_timeout.map(|timeout| {
            let token = job_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Job deadline of {:?} reached, cancelling remaining runs", timeout);
                token.cancel();
            })
        });

        let requests = config.requests();
        let outcome = Scheduler::new(config.parallelism)
            .run(&self.executor, &requests, &job_cancel, &self.reporter)
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        if outcome.cancelled {
            warn!(
                "Job cancelled: {} of {} runs completed",
                outcome.results.len(),
                config.runs
            );
        }

        let mut warnings: Vec<ParseWarning> = Vec::new();
        let mut runs: Vec<RunOutcomes> = Vec::with_capacity(outcome.results.len());
        for result in &outcome.results {
            let mut parsed = config.adapter.parse(result, &config.working_dir);
            for warning in &parsed.warnings {
                warn!("Parse warning in {}", warning);
            }
            for record in &mut parsed.outcomes {
                if let Some(message) = &record.message {
                    record.message = Some(truncate_message(message, config.max_error_length));
                }
            }
            debug!(
                "Run {} (seed {}) reported {} outcomes",
                result.run_index,
                result.seed,
                parsed.outcomes.len()
            );
            warnings.append(&mut parsed.warnings);
            runs.push(RunOutcomes {
                run_index: result.run_index,
                outcomes: parsed.outcomes,
            });
        }

        let mut aggregation = aggregate(&runs);
        if !config.ignore.is_empty() {
            let before = aggregation.stats.len();
            aggregation
                .stats
                .retain(|test_id, _| !config.ignore.is_ignored(test_id));
            debug!(
                "Ignore patterns removed {} tests",
                before - aggregation.stats.len()
            );
        }
        if !aggregation.silent_runs.is_empty() {
            warn!(
                "{} runs produced no parseable test output: {:?}",
                aggregation.silent_runs.len(),
                aggregation.silent_runs
            );
        }

        let report = build_report(
            aggregation,
            &outcome.results,
            JobMetadata {
                job_id,
                started_at,
                duration: start.elapsed(),
                framework: config.adapter.id.to_string(),
                requested_runs: config.runs,
                cancelled: outcome.cancelled,
                base_seed: config.base_seed,
                seeds: config.seeds.clone(),
                parse_warnings: warnings,
                save_full_output: config.save_full_output,
            },
        );

        info!(
            "Job {} finished: {} tests, {} flaky, {}/{} runs completed",
            job_id,
            report.per_test.len(),
            report.flaky().count(),
            report.job.completed_runs,
            report.job.requested_runs
        );
        self.reporter.on_job_complete(&report).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::executor::RunResult;
    use crate::report::NullReporter;
    use crate::severity::Severity;

    /// Emits pytest-style lines; `test_a` fails on even seeds.
    #[derive(Default)]
    struct ParityExecutor {
        launched: AtomicUsize,
    }

    #[async_trait]
    impl RunExecutor for ParityExecutor {
        async fn execute(&self, request: &RunRequest, _cancel: &CancellationToken) -> Option<RunResult> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let verdict = if request.seed % 2 == 0 { "FAILED" } else { "PASSED" };
            let stdout = format!(
                "tests/test_x.py::test_a {verdict}\ntests/test_x.py::test_b PASSED\ntests/slow/test_y.py::test_c PASSED\n"
            );
            Some(RunResult::completed(
                request.run_index,
                request.seed,
                Some(if request.seed % 2 == 0 { 1 } else { 0 }),
                stdout,
                String::new(),
            ))
        }
    }

    fn settings() -> JobSettings {
        JobSettings {
            base_seed: Some(42),
            ..Default::default()
        }
    }

    fn input(runs: usize) -> JobInput {
        JobInput::new("pytest tests/", runs, 3).with_framework("python")
    }

    #[test]
    fn test_run_config_resolves_command_and_seeds() {
        let config = RunConfig::new(&input(5), &settings()).unwrap();
        assert_eq!(config.adapter.id, "python");
        assert_eq!(config.command.program, "pytest");
        assert_eq!(config.command.args, vec!["tests/", "-v", "-rA"]);
        assert_eq!(config.seeds.len(), 5);
        assert_eq!(config.base_seed, Some(42));

        let again = RunConfig::new(&input(5), &settings()).unwrap();
        assert_eq!(config.seeds, again.seeds);
    }

    #[test]
    fn test_request_sets_seed_and_index_env() {
        let config = RunConfig::new(&input(3).with_seeds(vec![7, 8, 9]), &settings()).unwrap();
        let request = config.request(1);
        assert_eq!(request.seed, 8);
        assert!(request.command.env.contains(&("TEST_SEED".into(), "8".into())));
        assert!(request.command.env.contains(&("ATTEMPT".into(), "1".into())));
        assert_eq!(config.base_seed, None);
    }

    #[test]
    fn test_invalid_inputs_fail_before_detection() {
        assert!(matches!(
            RunConfig::new(&JobInput::new("pytest", 0, 1), &settings()),
            Err(JobError::Config(ConfigError::InvalidRuns(0)))
        ));
        assert!(matches!(
            RunConfig::new(&input(2).with_framework("cobol"), &settings()),
            Err(JobError::Detection(DetectionError::UnknownFramework(..)))
        ));
        let bad_range = JobSettings {
            seed_range: SeedRange { min: 5, max: 1 },
            ..settings()
        };
        assert!(matches!(
            RunConfig::new(&input(2), &bad_range),
            Err(JobError::Config(ConfigError::InvalidSeedRange { .. }))
        ));
        assert!(matches!(
            RunConfig::new(&JobInput::new("pytest 'open", 1, 1).with_framework("python"), &settings()),
            Err(JobError::Config(ConfigError::InvalidCommand(_)))
        ));
    }

    #[test]
    fn test_install_command_inherits_directory() {
        let settings = JobSettings {
            working_dir: PathBuf::from("/tmp/project"),
            ..settings()
        };
        let config = RunConfig::new(&input(1), &settings).unwrap();
        let install = config.install_command().unwrap();
        assert_eq!(install.program, "pip");
        assert_eq!(install.working_dir, Some(PathBuf::from("/tmp/project")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_job_reports_parity_flakiness() {
        let orchestrator = Orchestrator::new(ParityExecutor::default(), NullReporter);
        let report = orchestrator
            .run_job(&input(20), &settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(orchestrator.executor().launched.load(Ordering::SeqCst), 20);
        assert_eq!(report.job.requested_runs, 20);
        assert_eq!(report.job.completed_runs, 20);
        assert!(report.job.complete);

        let top = &report.per_test[0];
        assert_eq!(top.name, "tests/test_x.py::test_a");
        assert_eq!(top.observed_runs, 20);
        assert_eq!(top.failure_percentage, 50.0);
        assert_eq!(top.severity, Severity::High);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ignore_patterns_drop_tests() {
        let settings = JobSettings {
            ignore_patterns: vec!["tests/slow/*".into()],
            ..settings()
        };
        let orchestrator = Orchestrator::new(ParityExecutor::default(), NullReporter);
        let report = orchestrator
            .run_job(&input(4), &settings, &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<_> = report.per_test.iter().map(|t| t.name.as_str()).collect();
        assert!(!names.contains(&"tests/slow/test_y.py::test_c"));
        assert_eq!(names.len(), 2);
        assert!(report.job.silent_runs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_records_follow_output_setting() {
        let orchestrator = Orchestrator::new(ParityExecutor::default(), NullReporter);
        let lean = orchestrator
            .run_job(&input(3), &settings(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(lean.job.runs.len(), 3);
        assert!(lean.job.runs.iter().all(|r| r.stdout.is_none()));

        let full_settings = JobSettings {
            save_full_output: true,
            ..settings()
        };
        let full = orchestrator
            .run_job(&input(3), &full_settings, &CancellationToken::new())
            .await
            .unwrap();
        let indices: Vec<_> = full.job.runs.iter().map(|r| r.run_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for (run, seed) in full.job.runs.iter().zip(&full.job.seeds) {
            assert_eq!(run.seed, *seed);
            assert!(run.stdout.as_deref().is_some_and(|out| out.contains("test_b PASSED")));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fatal_error_launches_nothing() {
        let orchestrator = Orchestrator::new(ParityExecutor::default(), NullReporter);
        let result = orchestrator
            .run_job(&input(3).with_framework("nope"), &settings(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(JobError::Detection(_))));
        assert_eq!(orchestrator.executor().launched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_install_reports_success() {
        let orchestrator = Orchestrator::new(ParityExecutor::default(), NullReporter);
        let config = RunConfig::new(&input(1), &settings()).unwrap();
        // seed 0 is even, so the stub exits 1
        assert!(!orchestrator.install(&config, &CancellationToken::new()).await);
    }
}
