//! flaky-detector: finds flaky tests by running a suite many times.
//!
//! The suite is run `N` times, each run with its own seed passed through the
//! framework's seed environment variable, at most `P` runs at a time. Every
//! run's output is parsed into per-test outcomes, and each test's failure
//! percentage over the runs that reported it is classified into a severity.
//!
//! # Architecture
//!
//! - **Framework**: static adapter registry, detection and output parsers
//! - **Seed**: deterministic, distinct per-run seeds
//! - **Executor**: runs one subprocess with timeout and capture
//! - **Orchestrator**: validates a job and schedules its runs
//! - **Aggregate / Severity**: per-test statistics and classification
//! - **Report**: the structured result and console output
//!
//! # Example
//!
//! ```no_run
//! use flaky_detector::config::load_config;
//! use flaky_detector::executor::LocalExecutor;
//! use flaky_detector::orchestrator::{JobSettings, Orchestrator};
//! use flaky_detector::report::NullReporter;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("flaky-detector.toml"))?;
//!     let input = config.detector.job_input()?;
//!     let settings = JobSettings::from_config(&config.detector)?;
//!
//!     let orchestrator = Orchestrator::new(LocalExecutor::new(), NullReporter);
//!     let report = orchestrator
//!         .run_job(&input, &settings, &CancellationToken::new())
//!         .await?;
//!     println!("{} flaky tests", report.flaky().count());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod executor;
pub mod framework;
pub mod orchestrator;
pub mod report;
pub mod seed;
pub mod severity;

pub use config::{Config, JobInput, load_config};
pub use executor::{RunExecutor, RunResult};
pub use orchestrator::{JobError, Orchestrator};
pub use report::{Report, Reporter};
pub use severity::Severity;
