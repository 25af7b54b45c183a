//! Configuration schema definitions for flaky-detector.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── DetectorConfig   - What to run, how often, how wide, seeds and limits
//! └── ReportConfig     - Where to write the JSON report
//! ```
//!
//! [`JobInput`] is the smaller contract a detection job is started from. It
//! can be deserialized directly (e.g. from a JSON job description) or built
//! from a [`DetectorConfig`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::seed::SeedRange;

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [detector]
/// test_command = "pytest tests/"
/// runs = 20
/// parallelism = 4
/// timeout_secs = 120
/// ignore_patterns = ["tests/slow/*"]
///
/// [detector.seed_range]
/// min = 1
/// max = 1000000
///
/// [report]
/// output = "flaky-report.json"
/// ```
///
/// Every section and field is optional.
///
/// # Example
///
/// ```
/// use flaky_detector::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [detector]
///     test_command = "go test ./..."
///     runs = 5
/// "#).unwrap();
///
/// assert_eq!(config.detector.runs, 5);
/// assert_eq!(config.detector.parallelism, 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Detection job settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `test_command` | None (required to run) |
/// | `runs` | 10 |
/// | `parallelism` | 4 |
/// | `framework` | None (detected) |
/// | `seeds` | None (generated) |
/// | `base_seed` | None (random) |
/// | `seed_range` | 1..=1000000 |
/// | `timeout_secs` | 300 |
/// | `job_timeout_secs` | None |
/// | `ignore_patterns` | [] |
/// | `max_error_length` | 200 |
/// | `working_dir` | None (current directory) |
/// | `stream_output` | false |
/// | `save_full_output` | false |
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    /// The test command, e.g. `pytest tests/` or `go test ./...`.
    ///
    /// The detected adapter appends the flags that make its runner emit a
    /// parseable report.
    #[serde(default)]
    pub test_command: Option<String>,

    /// How many times the suite is run.
    ///
    /// Default: 10
    #[serde(default = "default_runs")]
    pub runs: usize,

    /// Maximum number of runs executing at once.
    ///
    /// Runs share the working tree, so suites that write into it may need
    /// a lower value.
    ///
    /// Default: 4
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Framework identifier (`go`, `rust`, `typescript-jest`,
    /// `typescript-vitest`, `javascript-mocha`, `python`). Detected from the
    /// working tree when absent.
    #[serde(default)]
    pub framework: Option<String>,

    /// Explicit per-run seeds. Must hold exactly `runs` entries.
    #[serde(default)]
    pub seeds: Option<Vec<u64>>,

    /// Base value for generated seeds. Reusing the base printed in a report
    /// reproduces that job's seeds.
    #[serde(default)]
    pub base_seed: Option<u64>,

    /// Range generated seeds are drawn from.
    #[serde(default)]
    pub seed_range: SeedRange,

    /// Per-run timeout in seconds. The run is killed when it elapses and
    /// whatever it printed so far is still parsed.
    ///
    /// Default: 300
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Deadline for the whole job in seconds. Runs still in flight when it
    /// elapses are killed and the report is marked incomplete.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    /// Shell-style globs (`*`, `?`, `[...]`) matched against test
    /// identities. Matching tests are left out of the report.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Failure messages are cut to this many characters.
    ///
    /// Default: 200
    #[serde(default = "default_max_error_length")]
    pub max_error_length: usize,

    /// Directory the test command runs in. `~` is expanded.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Log every captured output line at DEBUG, tagged with its run index.
    #[serde(default)]
    pub stream_output: bool,

    /// Keep every run's captured stdout and stderr in the JSON report.
    #[serde(default)]
    pub save_full_output: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            runs: default_runs(),
            parallelism: default_parallelism(),
            framework: None,
            seeds: None,
            base_seed: None,
            seed_range: SeedRange::default(),
            timeout_secs: default_timeout(),
            job_timeout_secs: None,
            ignore_patterns: Vec::new(),
            max_error_length: default_max_error_length(),
            working_dir: None,
            stream_output: false,
            save_full_output: false,
        }
    }
}

fn default_runs() -> usize {
    10
}

fn default_parallelism() -> usize {
    4
}

fn default_timeout() -> u64 {
    300
}

fn default_max_error_length() -> usize {
    200
}

/// Report output settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Path the JSON report is written to. Nothing is written when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// The input a detection job is started from.
///
/// ```json
/// { "test_command": "pytest", "runs": 20, "parallelism": 4, "framework": "python" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobInput {
    pub test_command: String,
    pub runs: usize,
    pub parallelism: usize,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub seed_list: Option<Vec<u64>>,
}

impl JobInput {
    /// Creates an input with generated seeds and detected framework.
    pub fn new(test_command: impl Into<String>, runs: usize, parallelism: usize) -> Self {
        Self {
            test_command: test_command.into(),
            runs,
            parallelism,
            framework: None,
            seed_list: None,
        }
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seed_list = Some(seeds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.detector.runs, 10);
        assert_eq!(config.detector.parallelism, 4);
        assert_eq!(config.detector.timeout_secs, 300);
        assert_eq!(config.detector.max_error_length, 200);
        assert_eq!(config.detector.seed_range, SeedRange { min: 1, max: 1_000_000 });
        assert!(config.report.output.is_none());
        assert!(!config.detector.save_full_output);
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [detector]
            test_command = "npx jest"
            runs = 50
            parallelism = 8
            framework = "typescript-jest"
            base_seed = 1234
            timeout_secs = 60
            job_timeout_secs = 900
            ignore_patterns = ["*slow*", "src/legacy/*"]
            max_error_length = 80
            working_dir = "~/src/app"
            stream_output = true
            save_full_output = true

            [detector.seed_range]
            min = 100
            max = 200

            [report]
            output = "out/report.json"
            "#,
        )
        .unwrap();

        let d = &config.detector;
        assert_eq!(d.test_command.as_deref(), Some("npx jest"));
        assert_eq!(d.framework.as_deref(), Some("typescript-jest"));
        assert_eq!(d.base_seed, Some(1234));
        assert_eq!(d.job_timeout_secs, Some(900));
        assert_eq!(d.ignore_patterns.len(), 2);
        assert_eq!(d.seed_range, SeedRange { min: 100, max: 200 });
        assert!(d.stream_output);
        assert!(d.save_full_output);
        assert_eq!(config.report.output, Some(PathBuf::from("out/report.json")));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = toml::from_str::<Config>("[detector]\nretries = 3\n").unwrap_err();
        assert!(err.to_string().contains("retries"));
    }

    #[test]
    fn test_job_input_from_json() {
        let input: JobInput = serde_json::from_str(
            r#"{"test_command":"pytest","runs":3,"parallelism":2,"seed_list":[1,2,3]}"#,
        )
        .unwrap();
        assert_eq!(input, JobInput::new("pytest", 3, 2).with_seeds(vec![1, 2, 3]));
    }
}
