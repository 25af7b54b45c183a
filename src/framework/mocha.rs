//! TAP parser for mocha's `tap` reporter.
//!
//! ```text
//! 1..3
//! ok 1 math adds
//! not ok 2 math subtracts
//!   AssertionError [ERR_ASSERTION]: 2 == 1
//!       at Context.<anonymous> (test/math.js:9:12)
//! ok 3 math later # SKIP -
//! # tests 3
//! ```
//!
//! The test point description (suite titles and test title) is the identity.
//! `# SKIP` and `# TODO` directives mark the point as skipped whatever its
//! `ok`/`not ok` prefix. The failure message is the first indented line under
//! a `not ok` point, or the `message:` key when the TAP 13 YAML block form
//! is used.

use std::sync::LazyLock;

use regex::Regex;

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity, record_lines};
use crate::executor::RunResult;

static TEST_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<not>not )?ok\b(?:\s+\d+)?(?:\s+-)?\s*(?P<desc>.*?)\s*(?:#\s*(?P<directive>SKIP|TODO)\b.*)?$")
        .expect("valid TAP test point regex")
});

static YAML_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*message:\s*(?P<value>.*)$").expect("valid YAML message regex")
});

/// State of the diagnostics block following a `not ok` point.
enum Diagnostics {
    None,
    Plain(String),
    Yaml(String),
    YamlBlockScalar(String),
}

/// Parses mocha TAP output from one run.
pub fn parse(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();
    let mut diagnostics = Diagnostics::None;

    for (line_no, raw) in record_lines(run, &run.stdout) {
        let line = raw.trim_end();
        let indented = line.starts_with(' ') || line.starts_with('\t');

        if indented {
            let text = line.trim();
            diagnostics = match diagnostics {
                Diagnostics::Plain(id) if text == "---" => Diagnostics::Yaml(id),
                Diagnostics::Plain(id) if !text.is_empty() => {
                    outcomes.attach_message(&id, text.to_string());
                    Diagnostics::None
                }
                Diagnostics::Yaml(id) => match YAML_MESSAGE.captures(line) {
                    Some(caps) => {
                        let value = caps["value"].trim().trim_matches(['\'', '"']);
                        if value.is_empty() || value.starts_with('|') || value.starts_with('>') {
                            Diagnostics::YamlBlockScalar(id)
                        } else {
                            outcomes.attach_message(&id, value.to_string());
                            Diagnostics::None
                        }
                    }
                    None if text == "..." => Diagnostics::None,
                    None => Diagnostics::Yaml(id),
                },
                Diagnostics::YamlBlockScalar(id) if !text.is_empty() => {
                    outcomes.attach_message(&id, text.to_string());
                    Diagnostics::None
                }
                other => other,
            };
            continue;
        }
        diagnostics = Diagnostics::None;

        if line.starts_with("Bail out!") {
            parsed.warn(run.run_index, Some(line_no), line.to_string());
            continue;
        }

        let Some(caps) = TEST_POINT.captures(line) else {
            continue;
        };
        let id = normalize_identity(&caps["desc"]);
        if id.is_empty() {
            parsed.warn(run.run_index, Some(line_no), "test point without a description");
            continue;
        }

        let status = match (caps.name("directive"), caps.name("not")) {
            (Some(_), _) => TestStatus::Skipped,
            (None, Some(_)) => TestStatus::Failed,
            (None, None) => TestStatus::Passed,
        };
        if status == TestStatus::Failed {
            diagnostics = Diagnostics::Plain(id.clone());
        }
        outcomes.record(TestOutcome::new(id, status, run.run_index));
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stdout: &str) -> RunResult {
        RunResult::completed(0, 3, Some(1), stdout.to_string(), String::new())
    }

    #[test]
    fn test_parse_tap_points() {
        let output = "\
1..4
ok 1 math adds
not ok 2 math subtracts
  AssertionError [ERR_ASSERTION]: 2 == 1
      at Context.<anonymous> (test/math.js:9:12)
ok 3 math later # SKIP -
not ok 4 math someday # TODO not written
# tests 4
# pass 1
# fail 1
";
        let parsed = parse(&run(output));
        assert!(parsed.warnings.is_empty());

        let outcomes = parsed.outcomes;
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].test_id, "math adds");
        assert_eq!(outcomes[0].status, TestStatus::Passed);
        assert_eq!(outcomes[1].test_id, "math subtracts");
        assert_eq!(outcomes[1].status, TestStatus::Failed);
        assert_eq!(
            outcomes[1].message.as_deref(),
            Some("AssertionError [ERR_ASSERTION]: 2 == 1")
        );
        assert_eq!(outcomes[2].test_id, "math later");
        assert_eq!(outcomes[2].status, TestStatus::Skipped);
        assert_eq!(outcomes[3].status, TestStatus::Skipped);
    }

    #[test]
    fn test_yaml_diagnostics() {
        let output = "\
TAP version 13
not ok 1 api retries - with dash
  ---
    message: |-
      expected 2 to equal 1
    stack: |-
      AssertionError: expected 2 to equal 1
  ...
not ok 2 api times out
  ---
    message: 'Timeout of 2000ms exceeded'
  ...
";
        let outcomes = parse(&run(output)).outcomes;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].test_id, "api retries - with dash");
        assert_eq!(outcomes[0].message.as_deref(), Some("expected 2 to equal 1"));
        assert_eq!(outcomes[1].message.as_deref(), Some("Timeout of 2000ms exceeded"));
    }

    #[test]
    fn test_bail_out_is_a_warning() {
        let output = "ok 1 first\nBail out! database unavailable\n";
        let parsed = parse(&run(output));
        assert_eq!(parsed.outcomes.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].line, Some(2));
    }

    #[test]
    fn test_point_without_number_or_with_dash() {
        let outcomes = parse(&run("ok - plain description\nnot ok spaced   out   name\n")).outcomes;
        assert_eq!(outcomes[0].test_id, "plain description");
        assert_eq!(outcomes[1].test_id, "spaced out name");
        assert_eq!(outcomes[1].status, TestStatus::Failed);
    }
}
