//! Test framework adapters and the uniform result model.
//!
//! Every supported ecosystem is described by one [`FrameworkAdapter`] entry in
//! a process-wide, immutable [`REGISTRY`]. An adapter knows how to recognise
//! its ecosystem in a working tree, which environment variable carries the
//! per-run seed, how to install dependencies, how to wrap the user's test
//! command, and how to turn the runner's captured output into [`TestOutcome`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     FrameworkAdapter                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  detection rules ──────────► detect::detect_framework()         │
//! │                                    │                            │
//! │                                    ▼                            │
//! │  resolve_command(test_command) ──► run command                  │
//! │                                    │                            │
//! │                                    ▼ (executed once per seed)   │
//! │  parse(RunResult) ────────► ParsedRun { outcomes, warnings }    │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Adapters
//!
//! Listed in detection priority order; the first match wins.
//!
//! | Identifier | Detected by | Seed variable | Output parsed |
//! |------------|-------------|---------------|---------------|
//! | `go` | `go.mod` | `GO_TEST_SEED` | `go test -json` events ([`gotest`]) |
//! | `rust` | `Cargo.toml` | `RUST_TEST_SEED` | libtest lines ([`cargo`]) |
//! | `typescript-jest` | `package.json` depends on `jest` | `JEST_SEED` | `--json` report ([`jest`]) |
//! | `typescript-vitest` | `package.json` depends on `vitest` | `VITE_TEST_SEED` | JUnit XML ([`vitest`]) |
//! | `javascript-mocha` | `package.json` depends on `mocha` | `MOCHA_SEED` | TAP ([`mocha`]) |
//! | `python` | `requirements.txt`, `pyproject.toml` or `setup.py` | `TEST_SEED` | pytest verbose lines ([`pytest`]) |
//!
//! # Outcome Vocabulary
//!
//! Runners report many statuses. They are folded onto [`TestStatus`]; only
//! `Passed`, `Failed` and `Error` are countable, while `Skipped` (which also
//! absorbs pending, todo and expected-failure results) is excluded from the
//! test's observed runs.

pub mod cargo;
pub mod detect;
pub mod gotest;
pub mod jest;
pub mod mocha;
pub mod pytest;
pub mod vitest;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::executor::{CompletionState, RunResult};

pub use detect::{DetectionError, detect_framework};

/// The outcome status of one test in one run.
///
/// | Status | Counts toward observed runs | Counts as failure |
/// |--------|-----------------------------|-------------------|
/// | Passed | Yes | No |
/// | Failed | Yes | Yes |
/// | Error | Yes | Yes |
/// | Skipped | No | No |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test assertions succeeded.
    Passed,

    /// Test ran and an assertion was not met.
    Failed,

    /// Test was skipped, pending, or an expected failure.
    Skipped,

    /// Test crashed or its setup/teardown failed.
    Error,
}

impl TestStatus {
    /// Returns `true` if this status counts toward a test's observed runs.
    ///
    /// # Example
    ///
    /// ```
    /// use flaky_detector::framework::TestStatus;
    ///
    /// assert!(TestStatus::Passed.is_countable());
    /// assert!(TestStatus::Error.is_countable());
    /// assert!(!TestStatus::Skipped.is_countable());
    /// ```
    pub fn is_countable(&self) -> bool {
        !matches!(self, TestStatus::Skipped)
    }

    /// Returns `true` if this status counts as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

/// One test's result as reported by one run.
///
/// Produced by an adapter's parser from a single [`RunResult`] and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Stable cross-run identity of the test.
    pub test_id: String,

    /// What happened to the test in this run.
    pub status: TestStatus,

    /// Assertion or error message for failed tests.
    pub message: Option<String>,

    /// Index of the run that reported this outcome.
    pub run_index: usize,
}

impl TestOutcome {
    /// Creates an outcome without a message.
    pub fn new(test_id: impl Into<String>, status: TestStatus, run_index: usize) -> Self {
        Self {
            test_id: test_id.into(),
            status,
            message: None,
            run_index,
        }
    }

    /// Sets the failure message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A single output record that could not be parsed.
///
/// Warnings never abort parsing; the remaining records of the run are still
/// read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// Run whose output contained the record.
    pub run_index: usize,

    /// 1-based line number of the record, when the format is line oriented.
    pub line: Option<usize>,

    /// What was wrong with the record.
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "run {} line {}: {}", self.run_index, line, self.reason),
            None => write!(f, "run {}: {}", self.run_index, self.reason),
        }
    }
}

/// Everything an adapter extracted from one run's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRun {
    pub outcomes: Vec<TestOutcome>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedRun {
    pub(crate) fn warn(&mut self, run_index: usize, line: Option<usize>, reason: impl Into<String>) {
        self.warnings.push(ParseWarning {
            run_index,
            line,
            reason: reason.into(),
        });
    }
}

/// Outcomes of one run, keyed by test identity.
///
/// Runners may mention a test more than once per run (a status line and a
/// summary line, or a call phase and a teardown phase). Records for the same
/// identity are merged: a failure outranks a pass, a pass outranks a skip, and
/// the first message seen is kept.
#[derive(Debug, Default)]
pub(crate) struct OutcomeSet {
    outcomes: Vec<TestOutcome>,
    index: HashMap<String, usize>,
}

impl OutcomeSet {
    pub(crate) fn record(&mut self, outcome: TestOutcome) {
        match self.index.get(&outcome.test_id) {
            Some(&i) => {
                let existing = &mut self.outcomes[i];
                if rank(outcome.status) > rank(existing.status) {
                    existing.status = outcome.status;
                }
                if existing.message.is_none() {
                    existing.message = outcome.message;
                }
            }
            None => {
                self.index.insert(outcome.test_id.clone(), self.outcomes.len());
                self.outcomes.push(outcome);
            }
        }
    }

    /// Attaches a message to an already recorded test. Returns `false` if the
    /// test has not been seen.
    pub(crate) fn attach_message(&mut self, test_id: &str, message: String) -> bool {
        match self.index.get(test_id) {
            Some(&i) => {
                let existing = &mut self.outcomes[i];
                if existing.message.is_none() && !message.is_empty() {
                    existing.message = Some(message);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn into_vec(self) -> Vec<TestOutcome> {
        self.outcomes
    }
}

fn rank(status: TestStatus) -> u8 {
    match status {
        TestStatus::Skipped => 0,
        TestStatus::Passed => 1,
        TestStatus::Failed | TestStatus::Error => 2,
    }
}

/// Output format emitted by an adapter's run command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// `pytest -v -rA` status lines and short test summary.
    PytestVerbose,
    /// `go test -json` event stream, one JSON object per line.
    GoTestJson,
    /// Jest `--json` report, falling back to the verbose text reporter.
    JestJson,
    /// JUnit XML written to stdout.
    JunitXml,
    /// Test Anything Protocol.
    Tap,
    /// libtest's plain `test name ... ok` lines.
    Libtest,
}

/// A file-system predicate used to recognise an ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionRule {
    /// The named file exists at the root of the working tree.
    FileExists(&'static str),
    /// At least one of the named files exists at the root.
    AnyFileExists(&'static [&'static str]),
    /// `package.json` lists the package under `dependencies` or `devDependencies`.
    PackageDependency(&'static str),
}

/// The closed set of supported ecosystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkKind {
    Go,
    Rust,
    Jest,
    Vitest,
    Mocha,
    Python,
}

/// Static description of one test ecosystem.
///
/// Entries live in [`REGISTRY`] for the lifetime of the process and are never
/// mutated, so they can be shared freely across concurrent jobs.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameworkAdapter {
    /// Which ecosystem this entry describes.
    pub kind: FrameworkKind,

    /// Identifier accepted in configuration (e.g. `"python"`).
    pub id: &'static str,

    /// Predicates that must all hold for the adapter to match.
    pub detection: &'static [DetectionRule],

    /// Environment variable carrying the per-run seed.
    pub seed_env: &'static str,

    /// Command that installs the project's dependencies.
    pub install_command: &'static str,

    /// Template wrapping the user's test command; `{command}` is replaced.
    pub run_command: &'static str,

    /// Format the run command emits.
    pub output_format: OutputFormat,
}

/// Placeholder replaced by the user's test command in run templates.
pub const COMMAND_PLACEHOLDER: &str = "{command}";

/// All adapters, in detection priority order.
///
/// Language-specific module files come before the generic `package.json`
/// checks, and those before the Python manifest files that many polyglot
/// repositories carry for tooling alone.
pub static REGISTRY: [FrameworkAdapter; 6] = [
    FrameworkAdapter {
        kind: FrameworkKind::Go,
        id: "go",
        detection: &[DetectionRule::FileExists("go.mod")],
        seed_env: "GO_TEST_SEED",
        install_command: "go mod download",
        run_command: "{command} -json",
        output_format: OutputFormat::GoTestJson,
    },
    FrameworkAdapter {
        kind: FrameworkKind::Rust,
        id: "rust",
        detection: &[DetectionRule::FileExists("Cargo.toml")],
        seed_env: "RUST_TEST_SEED",
        install_command: "cargo fetch",
        run_command: "{command}",
        output_format: OutputFormat::Libtest,
    },
    FrameworkAdapter {
        kind: FrameworkKind::Jest,
        id: "typescript-jest",
        detection: &[DetectionRule::PackageDependency("jest")],
        seed_env: "JEST_SEED",
        install_command: "npm install --silent",
        run_command: "{command} --json --verbose",
        output_format: OutputFormat::JestJson,
    },
    FrameworkAdapter {
        kind: FrameworkKind::Vitest,
        id: "typescript-vitest",
        detection: &[DetectionRule::PackageDependency("vitest")],
        seed_env: "VITE_TEST_SEED",
        install_command: "npm install --silent",
        run_command: "{command} --reporter=junit",
        output_format: OutputFormat::JunitXml,
    },
    FrameworkAdapter {
        kind: FrameworkKind::Mocha,
        id: "javascript-mocha",
        detection: &[DetectionRule::PackageDependency("mocha")],
        seed_env: "MOCHA_SEED",
        install_command: "npm install --silent",
        run_command: "{command} --reporter tap",
        output_format: OutputFormat::Tap,
    },
    FrameworkAdapter {
        kind: FrameworkKind::Python,
        id: "python",
        detection: &[DetectionRule::AnyFileExists(&[
            "requirements.txt",
            "pyproject.toml",
            "setup.py",
        ])],
        seed_env: "TEST_SEED",
        install_command: "pip install -q -r requirements.txt",
        run_command: "{command} -v -rA",
        output_format: OutputFormat::PytestVerbose,
    },
];

/// Returns every registered adapter in detection priority order.
pub fn registry() -> &'static [FrameworkAdapter] {
    &REGISTRY
}

/// Looks up an adapter by its identifier.
///
/// Matching ignores surrounding whitespace and ASCII case.
///
/// # Example
///
/// ```
/// use flaky_detector::framework::lookup;
///
/// assert_eq!(lookup("go").map(|a| a.seed_env), Some("GO_TEST_SEED"));
/// assert!(lookup("cobol").is_none());
/// ```
pub fn lookup(id: &str) -> Option<&'static FrameworkAdapter> {
    let id = id.trim();
    REGISTRY.iter().find(|a| a.id.eq_ignore_ascii_case(id))
}

/// Comma-separated list of known identifiers, for error messages.
pub fn known_ids() -> String {
    REGISTRY.iter().map(|a| a.id).collect::<Vec<_>>().join(", ")
}

impl FrameworkAdapter {
    /// Wraps the user's test command in this adapter's run template.
    ///
    /// # Example
    ///
    /// ```
    /// use flaky_detector::framework::lookup;
    ///
    /// let go = lookup("go").unwrap();
    /// assert_eq!(go.resolve_command("go test ./..."), "go test ./... -json");
    /// ```
    pub fn resolve_command(&self, test_command: &str) -> String {
        self.run_command
            .replace(COMMAND_PLACEHOLDER, test_command.trim())
    }

    /// Extracts test outcomes from one run's captured output.
    ///
    /// `root` is the directory the run was launched in; runners that report
    /// absolute file paths have them made relative to it, so identities do
    /// not depend on which of the runner's reporters produced them.
    ///
    /// Never fails: malformed records become [`ParseWarning`]s and the
    /// unterminated trailing record of a timed-out run is dropped.
    pub fn parse(&self, run: &RunResult, root: &Path) -> ParsedRun {
        match self.output_format {
            OutputFormat::PytestVerbose => pytest::parse(run),
            OutputFormat::GoTestJson => gotest::parse(run),
            OutputFormat::JestJson => jest::parse(run, root),
            OutputFormat::JunitXml => vitest::parse(run),
            OutputFormat::Tap => mocha::parse(run),
            OutputFormat::Libtest => cargo::parse(run),
        }
    }
}

impl fmt::Display for FrameworkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends.
///
/// Runner output may pad or wrap names differently between runs; identities
/// must not.
pub fn normalize_identity(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Iterates `(line_number, line)` over the complete lines of `text`.
///
/// A run that did not complete may have been cut off mid-line; its final
/// line is only yielded when terminated by a newline. Output of a completed
/// run is taken whole.
pub(crate) fn record_lines<'a>(
    run: &RunResult,
    text: &'a str,
) -> impl Iterator<Item = (usize, &'a str)> + 'a {
    let body = if run.state == CompletionState::Completed || text.ends_with('\n') {
        text
    } else {
        match text.rfind('\n') {
            Some(idx) => &text[..=idx],
            None => "",
        }
    };
    body.lines().enumerate().map(|(i, line)| (i + 1, line))
}

/// Truncates a message to at most `max_chars` characters.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}
