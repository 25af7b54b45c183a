//! pytest output parser.
//!
//! The python adapter runs the user's command with `-v -rA`, which makes
//! pytest print one status line per test and a short test summary with the
//! first line of every failure.
//!
//! # Recognised Lines
//!
//! ```text
//! tests/test_math.py::test_add PASSED                                  [ 50%]
//! [gw1] [ 75%] FAILED tests/test_math.py::TestDiv::test_zero
//! FAILED tests/test_math.py::TestDiv::test_zero - ZeroDivisionError: division by zero
//! ```
//!
//! The first two forms are status lines (plain and `pytest-xdist`), the third
//! is a summary line whose text after ` - ` becomes the failure message.
//!
//! # Status Mapping
//!
//! | pytest | Status |
//! |--------|--------|
//! | `PASSED`, `XPASS` | Passed |
//! | `FAILED` | Failed |
//! | `ERROR` | Error |
//! | `SKIPPED`, `XFAIL` | Skipped |
//!
//! A test that passes its call phase and errors in teardown is reported on
//! two lines; the error wins.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity, record_lines};
use crate::executor::RunResult;

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>\S+::\S+)\s+(?P<status>[A-Z]+)\b").expect("valid status regex")
});

static XDIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[gw\d+\]\s+\[\s*\d+%\]\s+(?P<status>[A-Z]+)\s+(?P<id>\S+::\S+)")
        .expect("valid xdist regex")
});

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<status>PASSED|FAILED|ERROR|XFAIL|XPASS)\s+(?P<id>\S+::\S+)(?:\s+-\s+(?P<msg>.*))?$")
        .expect("valid summary regex")
});

/// Maps a pytest status word onto the core vocabulary.
fn map_status(word: &str) -> Option<TestStatus> {
    match word {
        "PASSED" | "XPASS" => Some(TestStatus::Passed),
        "FAILED" => Some(TestStatus::Failed),
        "ERROR" => Some(TestStatus::Error),
        "SKIPPED" | "XFAIL" => Some(TestStatus::Skipped),
        _ => None,
    }
}

/// Parses `pytest -v -rA` output from one run.
pub fn parse(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();
    let mut in_summary = false;

    for (line_no, raw) in record_lines(run, &run.stdout) {
        let line = raw.trim_end();

        if line.starts_with('=') {
            in_summary = line.contains("short test summary info");
            continue;
        }

        if in_summary {
            if let Some(caps) = SUMMARY_LINE.captures(line)
                && let Some(status) = map_status(&caps["status"])
            {
                let mut outcome = TestOutcome::new(normalize_identity(&caps["id"]), status, run.run_index);
                if let Some(msg) = caps.name("msg") {
                    outcome = outcome.with_message(msg.as_str().trim());
                }
                outcomes.record(outcome);
            }
            continue;
        }

        let caps = match STATUS_LINE.captures(line).or_else(|| XDIST_LINE.captures(line)) {
            Some(caps) => caps,
            None => continue,
        };

        match map_status(&caps["status"]) {
            Some(status) => outcomes.record(TestOutcome::new(
                normalize_identity(&caps["id"]),
                status,
                run.run_index,
            )),
            None => parsed.warn(
                run.run_index,
                Some(line_no),
                format!("unrecognised pytest status `{}`", &caps["status"]),
            ),
        }
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}
