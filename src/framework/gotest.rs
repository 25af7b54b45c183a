//! `go test -json` event stream parser.
//!
//! Each stdout line is one `test2json` event:
//!
//! ```text
//! {"Action":"run","Package":"example.com/calc","Test":"TestAdd"}
//! {"Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"    calc_test.go:12: got 3, want 4\n"}
//! {"Action":"fail","Package":"example.com/calc","Test":"TestAdd","Elapsed":0.01}
//! ```
//!
//! Only events carrying a `Test` name produce outcomes; package-level events
//! are ignored. The identity is `Package::Test`, so subtests keep their
//! `TestParent/case` form. `output` events seen before a test fails become
//! its failure message.

use std::collections::HashMap;

use serde::Deserialize;

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity, record_lines};
use crate::executor::RunResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TestEvent {
    action: String,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

/// Output lines that carry no information about why a test failed.
fn is_framing(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with("=== RUN")
        || line.starts_with("=== PAUSE")
        || line.starts_with("=== CONT")
        || line.starts_with("--- FAIL")
        || line.starts_with("--- PASS")
        || line.starts_with("--- SKIP")
}

/// Parses one run's `go test -json` output.
pub fn parse(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();
    let mut captured: HashMap<String, Vec<String>> = HashMap::new();

    for (line_no, line) in record_lines(run, &run.stdout) {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }

        let event: TestEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                parsed.warn(run.run_index, Some(line_no), format!("invalid test2json event: {e}"));
                continue;
            }
        };

        let Some(test) = event.test.as_deref() else {
            continue;
        };
        let id = match event.package.as_deref() {
            Some(pkg) if !pkg.is_empty() => format!("{}::{}", pkg, normalize_identity(test)),
            _ => normalize_identity(test),
        };

        let status = match event.action.as_str() {
            "pass" => TestStatus::Passed,
            "fail" => TestStatus::Failed,
            "skip" => TestStatus::Skipped,
            "output" => {
                if let Some(text) = event.output
                    && !is_framing(&text)
                {
                    captured.entry(id).or_default().push(text.trim().to_string());
                }
                continue;
            }
            _ => continue,
        };

        let mut outcome = TestOutcome::new(id, status, run.run_index);
        if status.is_failure()
            && let Some(lines) = captured.remove(&outcome.test_id)
            && !lines.is_empty()
        {
            outcome = outcome.with_message(lines.join("\n"));
        }
        outcomes.record(outcome);
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stdout: &str) -> RunResult {
        RunResult::completed(1, 5, Some(1), stdout.to_string(), String::new())
    }

    #[test]
    fn test_parse_event_stream() {
        let output = r#"{"Action":"start","Package":"example.com/calc"}
{"Action":"run","Package":"example.com/calc","Test":"TestAdd"}
{"Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"=== RUN   TestAdd\n"}
{"Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"    calc_test.go:12: got 3, want 4\n"}
{"Action":"output","Package":"example.com/calc","Test":"TestAdd","Output":"--- FAIL: TestAdd (0.00s)\n"}
{"Action":"fail","Package":"example.com/calc","Test":"TestAdd","Elapsed":0}
{"Action":"run","Package":"example.com/calc","Test":"TestSub"}
{"Action":"pass","Package":"example.com/calc","Test":"TestSub","Elapsed":0}
{"Action":"skip","Package":"example.com/calc","Test":"TestSlow","Elapsed":0}
{"Action":"fail","Package":"example.com/calc","Elapsed":0.01}
"#;
        let parsed = parse(&run(output));
        assert!(parsed.warnings.is_empty());

        let outcomes = parsed.outcomes;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].test_id, "example.com/calc::TestAdd");
        assert_eq!(outcomes[0].status, TestStatus::Failed);
        assert_eq!(
            outcomes[0].message.as_deref(),
            Some("calc_test.go:12: got 3, want 4")
        );
        assert_eq!(outcomes[1].status, TestStatus::Passed);
        assert_eq!(outcomes[1].message, None);
        assert_eq!(outcomes[2].status, TestStatus::Skipped);
    }

    #[test]
    fn test_subtests_keep_their_path() {
        let output = r#"{"Action":"pass","Package":"p","Test":"TestTable/case_1"}
{"Action":"fail","Package":"p","Test":"TestTable/case_2"}
{"Action":"fail","Package":"p","Test":"TestTable"}
"#;
        let ids: Vec<_> = parse(&run(output))
            .outcomes
            .into_iter()
            .map(|o| o.test_id)
            .collect();
        assert_eq!(ids, vec!["p::TestTable/case_1", "p::TestTable/case_2", "p::TestTable"]);
    }

    #[test]
    fn test_malformed_line_is_warned_and_skipped() {
        let output = r#"{"Action":"pass","Package":"p","Test":"TestA"}
{"Action":"pass","Package":
{"Action":"fail","Package":"p","Test":"TestB"}
"#;
        let parsed = parse(&run(output));
        assert_eq!(parsed.outcomes.len(), 2);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].line, Some(2));
    }

    #[test]
    fn test_build_output_is_ignored() {
        let output = "# example.com/calc\n./calc.go:3:1: syntax error\nFAIL\texample.com/calc [build failed]\n";
        let parsed = parse(&run(output));
        assert!(parsed.outcomes.is_empty());
        assert!(parsed.warnings.is_empty());
    }
}
