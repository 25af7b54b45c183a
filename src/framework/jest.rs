//! Jest output parser.
//!
//! The jest adapter runs with `--json --verbose`. Jest then writes a single
//! JSON report to stdout and the human readable verbose reporter to stderr.
//! The JSON report is preferred; when it is missing or cut short (a timed
//! out run never prints it) the verbose text is parsed instead.
//!
//! # Identity
//!
//! `<test file>::<describe blocks and title joined by spaces>`, where the
//! title part is what Jest itself calls the test's `fullName`. The JSON report
//! names files by absolute path while the verbose reporter prints them
//! relative to the project root, so JSON paths are made relative to the run's
//! working directory. A test keeps one identity whether its run completed or
//! timed out.
//!
//! # Status Mapping
//!
//! | Jest | Status |
//! |------|--------|
//! | `passed` / `✓` | Passed |
//! | `failed` / `✕` | Failed |
//! | `pending`, `skipped`, `todo`, `disabled` / `○`, `✎` | Skipped |
//! | suite failed to run | Error (one record for the whole file) |

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity, record_lines};
use crate::executor::RunResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    #[serde(default)]
    test_results: Vec<SuiteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuiteResult {
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    assertion_results: Vec<AssertionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssertionResult {
    #[serde(default)]
    ancestor_titles: Vec<String>,
    title: String,
    #[serde(default)]
    full_name: Option<String>,
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

static SUITE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<status>PASS|FAIL)\s+(?P<file>\S+)").expect("valid suite header regex")
});

static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?P<mark>[✓✕○✎√×])\s+(?P<title>.+?)(?:\s+\(\d+(?:\.\d+)?\s*m?s\))?\s*$")
        .expect("valid test line regex")
});

static FAILURE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*●\s+(?P<name>.+?)\s*$").expect("valid failure header regex"));

fn map_status(status: &str) -> Option<TestStatus> {
    match status {
        "passed" => Some(TestStatus::Passed),
        "failed" => Some(TestStatus::Failed),
        "pending" | "skipped" | "todo" | "disabled" => Some(TestStatus::Skipped),
        _ => None,
    }
}

/// Parses one run of `jest --json --verbose` launched in `root`.
pub fn parse(run: &RunResult, root: &Path) -> ParsedRun {
    match parse_json(run, root) {
        Some(parsed) => parsed,
        None => parse_verbose(run),
    }
}

/// Reads the JSON report from stdout. Returns `None` when stdout holds no
/// complete report.
fn parse_json(run: &RunResult, root: &Path) -> Option<ParsedRun> {
    let start = run.stdout.find("{\"")?;
    let report: JestReport = serde_json::Deserializer::from_str(&run.stdout[start..])
        .into_iter()
        .next()?
        .ok()?;

    let roots = SuiteRoots::new(root);
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();

    for suite in report.test_results {
        let file = roots.relative(&suite.name);
        if suite.assertion_results.is_empty() && suite.status.as_deref() == Some("failed") {
            let mut outcome = TestOutcome::new(file, TestStatus::Error, run.run_index);
            if let Some(message) = suite.message.as_deref().and_then(first_meaningful_line) {
                outcome = outcome.with_message(message);
            }
            outcomes.record(outcome);
            continue;
        }

        for assertion in suite.assertion_results {
            let Some(status) = map_status(&assertion.status) else {
                parsed.warn(
                    run.run_index,
                    None,
                    format!("unrecognised jest status `{}` for `{}`", assertion.status, assertion.title),
                );
                continue;
            };
            let name = assertion.full_name.unwrap_or_else(|| {
                let mut parts = assertion.ancestor_titles;
                parts.push(assertion.title);
                parts.join(" ")
            });
            let mut outcome = TestOutcome::new(
                format!("{}::{}", file, normalize_identity(&name)),
                status,
                run.run_index,
            );
            if let Some(message) = assertion
                .failure_messages
                .iter()
                .find_map(|m| first_meaningful_line(m))
            {
                outcome = outcome.with_message(message);
            }
            outcomes.record(outcome);
        }
    }

    parsed.outcomes = outcomes.into_vec();
    Some(parsed)
}

/// Reads the verbose reporter's text from stderr.
///
/// Describe blocks are recovered from indentation: a line without a status
/// mark opens a block that stays open until a line at the same or a
/// shallower indent appears.
fn parse_verbose(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();

    let mut file: Option<String> = None;
    let mut blocks: Vec<(usize, String)> = Vec::new();
    let mut pending_failure: Option<String> = None;

    for (line_no, raw) in record_lines(run, &run.stderr) {
        let line = raw.trim_end();

        if let Some(caps) = SUITE_HEADER.captures(line) {
            let header = &caps["file"];
            file = Some(header.strip_prefix("./").unwrap_or(header).to_string());
            blocks.clear();
            pending_failure = None;
            continue;
        }
        let Some(current_file) = file.as_deref() else {
            continue;
        };

        if let Some(caps) = FAILURE_HEADER.captures(line) {
            let name = caps["name"].replace(" › ", " ");
            pending_failure = Some(format!("{}::{}", current_file, normalize_identity(&name)));
            continue;
        }
        if let Some(id) = pending_failure.as_deref() {
            if !line.trim().is_empty() {
                outcomes.attach_message(id, line.trim().to_string());
                pending_failure = None;
            }
            continue;
        }

        if let Some(caps) = TEST_LINE.captures(line) {
            let indent = caps["indent"].chars().count();
            blocks.retain(|(level, _)| *level < indent);
            let status = match &caps["mark"] {
                "✓" | "√" => TestStatus::Passed,
                "✕" | "×" => TestStatus::Failed,
                _ => TestStatus::Skipped,
            };
            let title = caps["title"].strip_prefix("skipped ").unwrap_or(&caps["title"]);
            let title = title.strip_prefix("todo ").unwrap_or(title);
            let mut path: Vec<&str> = blocks.iter().map(|(_, name)| name.as_str()).collect();
            path.push(title);
            outcomes.record(TestOutcome::new(
                format!("{}::{}", current_file, normalize_identity(&path.join(" "))),
                status,
                run.run_index,
            ));
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Tests:") || trimmed.starts_with("Test Suites:") {
            file = None;
            continue;
        }
        let indent = line.len() - trimmed.len();
        if indent == 0 {
            parsed.warn(run.run_index, Some(line_no), format!("unexpected jest output `{trimmed}`"));
            continue;
        }
        blocks.retain(|(level, _)| *level < indent);
        blocks.push((indent, trimmed.to_string()));
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}

/// The run directory as given and, when it differs, as the file system
/// resolves it. Jest reports real paths, so a symlinked or relative working
/// directory only matches in its canonical form.
struct SuiteRoots(Vec<PathBuf>);

impl SuiteRoots {
    fn new(root: &Path) -> Self {
        let mut roots = vec![root.to_path_buf()];
        if let Ok(canonical) = root.canonicalize()
            && canonical != root
        {
            roots.push(canonical);
        }
        Self(roots)
    }

    fn relative(&self, suite: &str) -> String {
        let path = Path::new(suite);
        self.0
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|| suite.to_string())
    }
}

fn first_meaningful_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> &'static Path {
        Path::new("/repo")
    }

    const REPORT: &str = r#"{"numFailedTests":1,"numPassedTests":1,"testResults":[{"name":"/repo/src/math.test.ts","status":"failed","message":"","assertionResults":[{"ancestorTitles":["math"],"title":"adds","fullName":"math adds","status":"passed","failureMessages":[]},{"ancestorTitles":["math"],"title":"subtracts","fullName":"math subtracts","status":"failed","failureMessages":["Error: expect(received).toBe(expected)\n\nExpected: 1\nReceived: 2"]},{"ancestorTitles":[],"title":"later","fullName":"later","status":"todo","failureMessages":[]}]},{"name":"/repo/src/broken.test.ts","status":"failed","message":"\n  ● Test suite failed to run\n\n    Cannot find module './x'","assertionResults":[]}],"success":false}
"#;

    #[test]
    fn test_parse_json_report() {
        let run = RunResult::completed(0, 1, Some(1), REPORT.to_string(), String::new());
        let parsed = parse(&run, repo());
        assert!(parsed.warnings.is_empty());

        let outcomes = parsed.outcomes;
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].test_id, "src/math.test.ts::math adds");
        assert_eq!(outcomes[0].status, TestStatus::Passed);
        assert_eq!(outcomes[1].status, TestStatus::Failed);
        assert_eq!(
            outcomes[1].message.as_deref(),
            Some("Error: expect(received).toBe(expected)")
        );
        assert_eq!(outcomes[2].status, TestStatus::Skipped);
        assert_eq!(outcomes[3].test_id, "src/broken.test.ts");
        assert_eq!(outcomes[3].status, TestStatus::Error);
        assert_eq!(outcomes[3].message.as_deref(), Some("● Test suite failed to run"));
    }

    #[test]
    fn test_json_with_trailing_noise() {
        let stdout = format!("{}npm notice: done\n", REPORT);
        let run = RunResult::completed(0, 1, Some(1), stdout, String::new());
        assert_eq!(parse(&run, repo()).outcomes.len(), 4);
    }

    const VERBOSE: &str = "\
PASS src/strings.test.ts
  strings
    ✓ trims (2 ms)
    nested
      ✓ pads
FAIL src/math.test.ts
  math
    ✓ adds (1 ms)
    ✕ subtracts (3 ms)
  ○ skipped later

  ● math › subtracts

    expect(received).toBe(expected)

Tests:       1 failed, 1 skipped, 3 passed, 5 total
";

    #[test]
    fn test_fallback_to_verbose_text() {
        let run = RunResult::completed(2, 1, Some(1), String::new(), VERBOSE.to_string());
        let parsed = parse(&run, repo());
        assert!(parsed.warnings.is_empty(), "{:?}", parsed.warnings);

        let outcomes = parsed.outcomes;
        let ids: Vec<_> = outcomes.iter().map(|o| o.test_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "src/strings.test.ts::strings trims",
                "src/strings.test.ts::strings nested pads",
                "src/math.test.ts::math adds",
                "src/math.test.ts::math subtracts",
                "src/math.test.ts::later",
            ]
        );
        assert_eq!(outcomes[3].status, TestStatus::Failed);
        assert_eq!(
            outcomes[3].message.as_deref(),
            Some("expect(received).toBe(expected)")
        );
        assert_eq!(outcomes[4].status, TestStatus::Skipped);
    }

    #[test]
    fn test_truncated_json_falls_back() {
        let cut = &REPORT[..REPORT.len() / 2];
        let run = RunResult::timed_out(0, 1, cut.to_string(), "PASS a.test.js\n  ✓ works\n".to_string());
        let outcomes = parse(&run, repo()).outcomes;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].test_id, "a.test.js::works");
    }

    #[test]
    fn test_completed_and_timed_out_runs_share_identities() {
        let completed = RunResult::completed(0, 1, Some(1), REPORT.to_string(), String::new());
        let timed_out = RunResult::timed_out(
            1,
            2,
            String::new(),
            "FAIL ./src/math.test.ts\n  math\n    ✓ adds (1 ms)\n    ✕ subtracts (3 ms)\n    ✓ multi".to_string(),
        );

        let from_json: Vec<_> = parse(&completed, repo())
            .outcomes
            .into_iter()
            .filter(|o| o.status != TestStatus::Skipped && o.status != TestStatus::Error)
            .map(|o| o.test_id)
            .collect();
        let from_text: Vec<_> = parse(&timed_out, repo())
            .outcomes
            .into_iter()
            .map(|o| o.test_id)
            .collect();

        assert_eq!(from_json, from_text);
        assert_eq!(from_text, vec!["src/math.test.ts::math adds", "src/math.test.ts::math subtracts"]);
    }

    #[test]
    fn test_suite_outside_root_keeps_absolute_path() {
        let report = REPORT.replace("/repo/src/math.test.ts", "/elsewhere/math.test.ts");
        let run = RunResult::completed(0, 1, Some(1), report, String::new());
        let outcomes = parse(&run, repo()).outcomes;
        assert_eq!(outcomes[0].test_id, "/elsewhere/math.test.ts::math adds");
        assert_eq!(outcomes[3].test_id, "src/broken.test.ts");
    }
}
