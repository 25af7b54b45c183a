//! Configuration loading, validation and schema definitions.
//!
//! Settings are read from a TOML file (`flaky-detector.toml` by default).
//! A missing file is not an error: every setting has a default, and the test
//! command can come from the command line instead.

pub mod filter;
pub mod schema;

pub use filter::IgnoreFilter;
pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "flaky-detector.toml";

/// Upper bound on runs per job.
pub const MAX_RUNS: usize = 1000;

/// Upper bound on concurrent runs.
pub const MAX_PARALLELISM: usize = 50;

/// An invalid job configuration. Always raised before any run is launched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("runs must be at least 1 (got {0})")]
    InvalidRuns(usize),

    #[error("parallelism must be at least 1 (got {0})")]
    InvalidParallelism(usize),

    #[error("runs must be at most {} (got {})", MAX_RUNS, .0)]
    TooManyRuns(usize),

    #[error("parallelism must be at most {} (got {})", MAX_PARALLELISM, .0)]
    TooMuchParallelism(usize),

    #[error("seed list has {actual} entries but runs is {expected}")]
    SeedListLength { expected: usize, actual: usize },

    #[error("no test command given")]
    EmptyCommand,

    #[error("invalid test command: {0}")]
    InvalidCommand(String),

    #[error("seed range is empty (min {min} > max {max})")]
    InvalidSeedRange { min: u64, max: u64 },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or has
/// fields the schema does not know.
///
/// # Example
///
/// ```no_run
/// use flaky_detector::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("flaky-detector.toml"))?;
/// println!("Runs: {}", config.detector.runs);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// # Example
///
/// ```
/// use flaky_detector::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [detector]
///     test_command = "pytest"
///     parallelism = 2
/// "#)?;
///
/// assert_eq!(config.detector.parallelism, 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        debug!("No config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

impl DetectorConfig {
    /// Checks every setting that can be checked without a test command.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_counts(self.runs, self.parallelism)?;
        if let Some(seeds) = &self.seeds
            && seeds.len() != self.runs
        {
            return Err(ConfigError::SeedListLength {
                expected: self.runs,
                actual: seeds.len(),
            });
        }
        if self.seed_range.min > self.seed_range.max {
            return Err(ConfigError::InvalidSeedRange {
                min: self.seed_range.min,
                max: self.seed_range.max,
            });
        }
        IgnoreFilter::new(self.ignore_patterns.as_slice())?;
        Ok(())
    }

    /// Builds the job input from these settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyCommand`] when no test command is configured.
    pub fn job_input(&self) -> Result<JobInput, ConfigError> {
        let command = self
            .test_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::EmptyCommand)?;

        Ok(JobInput {
            test_command: command.to_string(),
            runs: self.runs,
            parallelism: self.parallelism,
            framework: self.framework.clone(),
            seed_list: self.seeds.clone(),
        })
    }

    /// The configured working directory with `~` and `$VAR` expanded, or the
    /// current directory.
    pub fn resolved_working_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => {
                let raw = dir.to_string_lossy();
                let expanded = shellexpand::full(&raw)
                    .with_context(|| format!("Failed to expand working_dir: {raw}"))?;
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => std::env::current_dir().context("Failed to determine current directory"),
        }
    }
}

impl JobInput {
    /// Checks the input's counts, seed list and command.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.test_command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        validate_counts(self.runs, self.parallelism)?;
        if let Some(seeds) = &self.seed_list
            && seeds.len() != self.runs
        {
            return Err(ConfigError::SeedListLength {
                expected: self.runs,
                actual: seeds.len(),
            });
        }
        Ok(())
    }
}

fn validate_counts(runs: usize, parallelism: usize) -> Result<(), ConfigError> {
    if runs == 0 {
        return Err(ConfigError::InvalidRuns(runs));
    }
    if runs > MAX_RUNS {
        return Err(ConfigError::TooManyRuns(runs));
    }
    if parallelism == 0 {
        return Err(ConfigError::InvalidParallelism(parallelism));
    }
    if parallelism > MAX_PARALLELISM {
        return Err(ConfigError::TooMuchParallelism(parallelism));
    }
    Ok(())
}
