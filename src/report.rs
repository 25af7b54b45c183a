//! Job reports and console output.
//!
//! A [`Report`] is the final, serializable product of a detection job: one
//! row per test, sorted by failure percentage (highest first, ties by name),
//! plus the job metadata needed to judge how much the numbers can be
//! trusted.
//!
//! # Reporters
//!
//! [`Reporter`] is notified while a job runs:
//!
//! | Hook | When |
//! |------|------|
//! | `on_job_start` | After validation and detection, before the first run |
//! | `on_run_complete` | Each time a run finishes, in completion order |
//! | `on_job_complete` | After aggregation |
//!
//! [`ConsoleReporter`] drives a progress bar and prints the summary;
//! [`NullReporter`] does nothing.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregation, FlakinessStats};
use crate::executor::{CompletionState, RunResult};
use crate::framework::ParseWarning;
use crate::severity::Severity;

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub name: String,
    pub failures: usize,
    pub passes: usize,
    pub observed_runs: usize,
    pub failure_percentage: f64,
    pub severity: Severity,
    pub failed_runs: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
}

impl From<FlakinessStats> for TestSummary {
    fn from(stats: FlakinessStats) -> Self {
        Self {
            name: stats.test_id,
            failures: stats.failures,
            passes: stats.passes,
            observed_runs: stats.observed_runs,
            failure_percentage: stats.failure_percentage,
            severity: stats.severity,
            failed_runs: stats.failed_runs,
            first_failure: stats.first_failure,
        }
    }
}

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_index: usize,
    pub seed: u64,
    pub state: CompletionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured stdout, present when the job saves full output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl RunSummary {
    pub fn new(result: &RunResult, save_output: bool) -> Self {
        Self {
            run_index: result.run_index,
            seed: result.seed,
            state: result.state,
            exit_code: result.exit_code,
            duration_secs: result.duration.as_secs_f64(),
            error: result.error.clone(),
            stdout: save_output.then(|| result.stdout.clone()),
            stderr: save_output.then(|| result.stderr.clone()),
        }
    }
}

/// Job-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub framework: String,
    pub requested_runs: usize,
    pub completed_runs: usize,
    pub timed_out_runs: usize,
    pub process_error_runs: usize,
    pub runs_with_no_output: usize,
    /// Indices of the runs counted in `runs_with_no_output`.
    pub silent_runs: Vec<usize>,
    /// `true` when every requested run produced a result.
    pub complete: bool,
    pub cancelled: bool,
    /// Base of the generated seeds; absent when seeds were given explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_seed: Option<u64>,
    /// Seed of each run, indexed by run.
    pub seeds: Vec<u64>,
    #[serde(default)]
    pub parse_warnings: Vec<ParseWarning>,
    /// One entry per finished run, in run order.
    #[serde(default)]
    pub runs: Vec<RunSummary>,
}

/// The result of a detection job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub per_test: Vec<TestSummary>,
    pub job: JobSummary,
}

/// Everything about a finished job except its per-test statistics.
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub framework: String,
    pub requested_runs: usize,
    pub cancelled: bool,
    pub base_seed: Option<u64>,
    pub seeds: Vec<u64>,
    pub parse_warnings: Vec<ParseWarning>,
    /// Keep each run's stdout and stderr in the report.
    pub save_full_output: bool,
}

/// Builds the report from aggregated statistics and the completed runs.
///
/// Rows are sorted by failure percentage descending, then by name
/// ascending.
pub fn build_report(aggregation: Aggregation, results: &[RunResult], meta: JobMetadata) -> Report {
    let mut per_test: Vec<TestSummary> = aggregation
        .stats
        .into_values()
        .map(TestSummary::from)
        .collect();
    per_test.sort_by(|a, b| {
        b.failure_percentage
            .total_cmp(&a.failure_percentage)
            .then_with(|| a.name.cmp(&b.name))
    });

    let count = |state: CompletionState| results.iter().filter(|r| r.state == state).count();
    let completed_runs = results.len();

    Report {
        per_test,
        job: JobSummary {
            job_id: meta.job_id,
            started_at: meta.started_at,
            duration_secs: meta.duration.as_secs_f64(),
            framework: meta.framework,
            requested_runs: meta.requested_runs,
            completed_runs,
            timed_out_runs: count(CompletionState::TimedOut),
            process_error_runs: count(CompletionState::ProcessError),
            runs_with_no_output: aggregation.silent_runs.len(),
            silent_runs: aggregation.silent_runs.into_iter().collect(),
            complete: completed_runs == meta.requested_runs,
            cancelled: meta.cancelled,
            base_seed: meta.base_seed,
            seeds: meta.seeds,
            parse_warnings: meta.parse_warnings,
            runs: results
                .iter()
                .map(|r| RunSummary::new(r, meta.save_full_output))
                .collect(),
        },
    }
}

impl Report {
    /// Tests that failed in at least one run.
    pub fn flaky(&self) -> impl Iterator<Item = &TestSummary> {
        self.per_test.iter().filter(|t| t.severity.is_flaky())
    }

    pub fn has_flaky(&self) -> bool {
        self.flaky().next().is_some()
    }

    /// Conventional exit code for the job.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | 0 | Full sample, no flaky test |
    /// | 1 | A flaky test was found, or the sample is incomplete |
    pub fn exit_code(&self) -> i32 {
        if self.has_flaky() || !self.job.complete {
            1
        } else {
            0
        }
    }

    /// Writes the report as pretty-printed JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}

/// Receives progress notifications from a running job.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn on_job_start(&self, framework: &str, runs: usize);
    async fn on_run_complete(&self, result: &RunResult);
    async fn on_job_complete(&self, report: &Report);
}

/// Reporter that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_job_start(&self, _framework: &str, _runs: usize) {}
    async fn on_run_complete(&self, _result: &RunResult) {}
    async fn on_job_complete(&self, _report: &Report) {}
}

/// Console reporter that shows a progress bar and prints the summary.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_job_start(&self, framework: &str, runs: usize) {
        println!("Running {} suite {} times", console::style(framework).bold(), runs);

        let pb = indicatif::ProgressBar::new(runs as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        if let Ok(mut slot) = self.progress.lock() {
            *slot = Some(pb);
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        let Ok(slot) = self.progress.lock() else {
            return;
        };
        let Some(pb) = slot.as_ref() else {
            return;
        };
        pb.inc(1);

        let status = match result.state {
            CompletionState::Completed if result.success() => console::style("PASS").green(),
            CompletionState::Completed => console::style("FAIL").red(),
            CompletionState::TimedOut => console::style("TIME").yellow(),
            CompletionState::ProcessError => console::style("ERR ").red().bold(),
        };
        if self.verbose || result.state != CompletionState::Completed {
            pb.println(format!(
                "{} run {} (seed {}) in {:.1}s",
                status,
                result.run_index,
                result.seed,
                result.duration.as_secs_f64()
            ));
        }
    }

    async fn on_job_complete(&self, report: &Report) {
        if let Ok(mut slot) = self.progress.lock()
            && let Some(pb) = slot.take()
        {
            pb.finish_and_clear();
        }
        print_summary(report);
    }
}

fn styled_severity(severity: Severity) -> console::StyledObject<&'static str> {
    let label = console::style(severity.as_str());
    match severity {
        Severity::Stable => label.green(),
        Severity::Low => label.cyan(),
        Severity::Medium => label.yellow(),
        Severity::High => label.red(),
        Severity::Critical => label.red().bold(),
    }
}

/// Prints the report to stdout with colours.
pub fn print_summary(report: &Report) {
    let job = &report.job;

    println!();
    println!("Flakiness Report ({})", job.framework);
    println!(
        "  Runs:      {}/{} completed",
        job.completed_runs, job.requested_runs
    );
    if job.timed_out_runs > 0 {
        println!("  Timed out: {}", console::style(job.timed_out_runs).yellow());
    }
    if job.process_error_runs > 0 {
        println!(
            "  Errors:    {}",
            console::style(job.process_error_runs).red()
        );
    }
    if job.runs_with_no_output > 0 {
        println!(
            "  No output: {} (runs {:?})",
            console::style(job.runs_with_no_output).yellow(),
            job.silent_runs
        );
    }
    if !job.parse_warnings.is_empty() {
        println!(
            "  Warnings:  {}",
            console::style(job.parse_warnings.len()).yellow()
        );
    }
    if let Some(base) = job.base_seed {
        println!("  Base seed: {}", base);
    }
    for run in &job.runs {
        if let Some(error) = &run.error {
            println!(
                "    run {} (seed {}): {}",
                run.run_index,
                run.seed,
                console::style(error).dim()
            );
        }
    }
    println!("  Duration:  {:.1}s", job.duration_secs);

    let flaky: Vec<_> = report.flaky().collect();
    let stable = report.per_test.len() - flaky.len();

    println!();
    if flaky.is_empty() {
        println!(
            "{}",
            console::style(format!("No flaky tests among {} tests.", stable))
                .green()
                .bold()
        );
    } else {
        println!(
            "{}",
            console::style(format!(
                "{} flaky of {} tests:",
                flaky.len(),
                report.per_test.len()
            ))
            .red()
            .bold()
        );
        for test in flaky {
            println!(
                "  {:>8} {:>6.1}% ({}/{})  {}",
                styled_severity(test.severity),
                test.failure_percentage,
                test.failures,
                test.observed_runs,
                test.name
            );
            if let Some(msg) = &test.first_failure {
                println!("           {}", console::style(msg).dim());
            }
        }
    }

    if !job.complete {
        println!();
        println!(
            "{}",
            console::style(format!(
                "Incomplete sample: {} of {} runs finished{}.",
                job.completed_runs,
                job.requested_runs,
                if job.cancelled { " before cancellation" } else { "" }
            ))
            .red()
            .bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::aggregate::{RunOutcomes, aggregate};
    use crate::framework::{TestOutcome, TestStatus};

    fn meta(requested_runs: usize) -> JobMetadata {
        JobMetadata {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::from_millis(1500),
            framework: "python".into(),
            requested_runs,
            cancelled: false,
            base_seed: Some(7),
            seeds: (1..=requested_runs as u64).collect(),
            parse_warnings: Vec::new(),
            save_full_output: false,
        }
    }

    fn stats(name: &str, failures: usize, observed: usize) -> FlakinessStats {
        let pct = 100.0 * failures as f64 / observed as f64;
        FlakinessStats {
            test_id: name.into(),
            observed_runs: observed,
            passes: observed - failures,
            failures,
            failure_percentage: pct,
            severity: crate::severity::classify(pct),
            failed_runs: (0..failures).collect(),
            first_failure: None,
        }
    }

    fn aggregation(rows: Vec<FlakinessStats>) -> Aggregation {
        Aggregation {
            stats: rows.into_iter().map(|s| (s.test_id.clone(), s)).collect(),
            silent_runs: BTreeSet::new(),
        }
    }

    #[test]
    fn test_rows_sorted_by_percentage_then_name() {
        let agg = aggregation(vec![
            stats("b", 1, 4),
            stats("z", 0, 4),
            stats("a", 1, 4),
            stats("c", 4, 4),
        ]);
        let report = build_report(agg, &[], meta(4));
        let names: Vec<_> = report.per_test.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b", "z"]);
    }

    #[test]
    fn test_job_counts() {
        let results = vec![
            RunResult::completed(0, 1, Some(0), "x".into(), String::new()),
            RunResult::timed_out(1, 2, String::new(), String::new()),
            RunResult::process_error(2, 3, "boom"),
        ];
        let runs: Vec<RunOutcomes> = vec![
            RunOutcomes {
                run_index: 0,
                outcomes: vec![TestOutcome::new("t", TestStatus::Passed, 0)],
            },
            RunOutcomes {
                run_index: 1,
                outcomes: Vec::new(),
            },
            RunOutcomes {
                run_index: 2,
                outcomes: Vec::new(),
            },
        ];
        let report = build_report(aggregate(&runs), &results, meta(5));

        assert_eq!(report.job.completed_runs, 3);
        assert_eq!(report.job.timed_out_runs, 1);
        assert_eq!(report.job.process_error_runs, 1);
        assert_eq!(report.job.runs_with_no_output, 2);
        assert_eq!(report.job.silent_runs, vec![1, 2]);
        assert!(!report.job.complete);
        assert_eq!(report.exit_code(), 1);

        let states: Vec<_> = report.job.runs.iter().map(|r| (r.run_index, r.state)).collect();
        assert_eq!(
            states,
            vec![
                (0, CompletionState::Completed),
                (1, CompletionState::TimedOut),
                (2, CompletionState::ProcessError),
            ]
        );
        assert_eq!(report.job.runs[0].exit_code, Some(0));
        assert_eq!(report.job.runs[2].error.as_deref(), Some("boom"));
        assert_eq!(report.job.runs[2].seed, 3);
        assert!(report.job.runs.iter().all(|r| r.stdout.is_none()));
    }

    #[test]
    fn test_full_output_is_kept_on_request() {
        let results = vec![
            RunResult::completed(0, 9, Some(1), "t FAILED\n".into(), "trace\n".into())
                .with_duration(Duration::from_millis(250)),
        ];
        let lean = build_report(aggregation(Vec::new()), &results, meta(1));
        let value = serde_json::to_value(&lean).unwrap();
        assert!(value["job"]["runs"][0].get("stdout").is_none());
        assert_eq!(value["job"]["runs"][0]["state"], "completed");
        assert_eq!(value["job"]["runs"][0]["duration_secs"], 0.25);

        let full = build_report(
            aggregation(Vec::new()),
            &results,
            JobMetadata {
                save_full_output: true,
                ..meta(1)
            },
        );
        let run = &full.job.runs[0];
        assert_eq!(run.stdout.as_deref(), Some("t FAILED\n"));
        assert_eq!(run.stderr.as_deref(), Some("trace\n"));
    }

    #[test]
    fn test_exit_code() {
        let stable = build_report(aggregation(vec![stats("a", 0, 2)]), &[], meta(0));
        assert!(!stable.has_flaky());
        assert_eq!(stable.exit_code(), 0);

        let flaky = build_report(aggregation(vec![stats("a", 1, 2)]), &[], meta(0));
        assert!(flaky.has_flaky());
        assert_eq!(flaky.exit_code(), 1);
    }

    #[test]
    fn test_json_round_trip_and_shape() {
        let report = build_report(aggregation(vec![stats("a", 1, 2)]), &[], meta(0));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        report.write_json(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["per_test"][0]["name"], "a");
        assert_eq!(value["per_test"][0]["severity"], "HIGH");
        assert_eq!(value["job"]["requested_runs"], 0);

        let parsed: Report = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, report);
    }

    #[tokio::test]
    async fn test_console_reporter_lifecycle() {
        let reporter = ConsoleReporter::new(true);
        reporter.on_job_start("python", 1).await;
        reporter
            .on_run_complete(&RunResult::completed(0, 1, Some(1), String::new(), String::new()))
            .await;
        let report = build_report(aggregation(vec![stats("a", 1, 1)]), &[], meta(1));
        reporter.on_job_complete(&report).await;
        assert!(reporter.progress.lock().unwrap().is_none());
    }
}
