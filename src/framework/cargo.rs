//! libtest output parser for `cargo test`.
//!
//! # Recognised Lines
//!
//! ```text
//!      Running unittests src/lib.rs (target/debug/deps/calc-1a2b3c)
//!    Doc-tests calc
//! test tests::adds ... ok
//! test tests::subtracts ... FAILED
//! test tests::slow ... ignored, needs network
//! ---- tests::subtracts stdout ----
//! thread 'tests::subtracts' panicked at src/lib.rs:10:9:
//! assertion `left == right` failed
//! ```
//!
//! Cargo prints its `Running` lines on stderr, so they are only seen when
//! the command merges both streams (e.g. `sh -c 'cargo test 2>&1'`). When
//! they are seen, test names are prefixed with the target's source path
//! (`src/lib.rs::tests::adds`) so that equally named tests in different
//! targets stay apart. Doc tests already carry their source path in the
//! name, so after a `Doc-tests` line the crate name is the prefix instead
//! (`calc::src/lib.rs - add (line 5)`), which keeps the doc tests of the
//! crates in a workspace apart. Without the headers the bare test path is
//! the identity.
//!
//! The first line of a failed test's panic message becomes its failure
//! message.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity, record_lines};
use crate::executor::RunResult;

static RUNNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Running\s+(?:unittests\s+)?(?P<target>\S+)").expect("valid running regex")
});

static DOC_TESTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Doc-tests\s+(?P<crate>\S+)").expect("valid doc-tests regex")
});

static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (?P<name>.+?) \.\.\. (?P<status>ok|FAILED|ignored)\b")
        .expect("valid test line regex")
});

static OUTPUT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^---- (?P<name>.+?) std(?:out|err) ----$").expect("valid output header regex")
});

fn identity(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}::{}", prefix, normalize_identity(name)),
        None => normalize_identity(name),
    }
}

/// Parses one run of `cargo test` output.
pub fn parse(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();
    let mut prefix: Option<String> = None;
    let mut section: Option<String> = None;

    for (_, raw) in record_lines(run, &run.stdout) {
        let line = raw.trim_end();

        if let Some(caps) = RUNNING.captures(line) {
            prefix = Some(caps["target"].to_string());
            section = None;
            continue;
        }
        if let Some(caps) = DOC_TESTS.captures(line) {
            prefix = Some(caps["crate"].to_string());
            section = None;
            continue;
        }

        if let Some(caps) = TEST_LINE.captures(line) {
            let status = match &caps["status"] {
                "ok" => TestStatus::Passed,
                "FAILED" => TestStatus::Failed,
                _ => TestStatus::Skipped,
            };
            outcomes.record(TestOutcome::new(
                identity(prefix.as_deref(), &caps["name"]),
                status,
                run.run_index,
            ));
            continue;
        }

        if let Some(caps) = OUTPUT_HEADER.captures(line) {
            section = Some(identity(prefix.as_deref(), &caps["name"]));
            continue;
        }

        let Some(id) = section.as_deref() else {
            continue;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.starts_with("thread '") && text.ends_with(':') {
            continue;
        }
        let message = match text
            .strip_prefix("thread '")
            .and_then(|rest| rest.split_once("' panicked at "))
        {
            // Older toolchains: panicked at 'message', src/lib.rs:3:5
            Some((_, detail)) => detail
                .strip_prefix('\'')
                .and_then(|d| d.rsplit_once("', "))
                .map_or(detail, |(msg, _)| msg),
            None => text,
        };
        outcomes.attach_message(id, message.to_string());
        section = None;
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}
