//! Vitest JUnit XML parser.
//!
//! The vitest adapter runs with `--reporter=junit`, which prints a JUnit XML
//! document on stdout:
//!
//! ```xml
//! <testsuites>
//!   <testsuite name="src/math.test.ts">
//!     <testcase classname="src/math.test.ts" name="math &gt; adds"/>
//!     <testcase classname="src/math.test.ts" name="math &gt; subtracts">
//!       <failure message="expected 2 to be 1" type="AssertionError">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! The identity is `classname::name`. A document cut off mid-way (the run
//! timed out) yields every test case that was closed before the cut; the
//! open one is dropped.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{OutcomeSet, ParsedRun, TestOutcome, TestStatus, normalize_identity};
use crate::executor::RunResult;

/// A `<testcase>` whose closing tag has not been seen yet.
struct OpenCase {
    id: String,
    status: TestStatus,
    message: Option<String>,
    in_detail: bool,
}

impl OpenCase {
    fn into_outcome(self, run_index: usize) -> TestOutcome {
        let outcome = TestOutcome::new(self.id, self.status, run_index);
        match self.message {
            Some(message) => outcome.with_message(message),
            None => outcome,
        }
    }
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn case_identity(element: &BytesStart<'_>) -> String {
    let name = attribute(element, "name").unwrap_or_default();
    match attribute(element, "classname") {
        Some(class) if !class.is_empty() => format!("{}::{}", class, normalize_identity(&name)),
        _ => normalize_identity(&name),
    }
}

/// Applies a `<failure>`, `<error>` or `<skipped>` child to the open case.
fn apply_detail(case: &mut OpenCase, element: &BytesStart<'_>) -> bool {
    let status = match element.name().as_ref() {
        b"failure" => TestStatus::Failed,
        b"error" => TestStatus::Error,
        b"skipped" => TestStatus::Skipped,
        _ => return false,
    };
    case.status = status;
    if status.is_failure() {
        case.message = attribute(element, "message").filter(|m| !m.trim().is_empty());
    }
    true
}

/// Parses the JUnit XML document in one run's stdout.
pub fn parse(run: &RunResult) -> ParsedRun {
    let mut parsed = ParsedRun::default();
    let mut outcomes = OutcomeSet::default();

    let start = run
        .stdout
        .find("<?xml")
        .or_else(|| run.stdout.find("<testsuites"))
        .or_else(|| run.stdout.find("<testsuite"));
    let Some(start) = start else {
        return parsed;
    };

    let mut reader = Reader::from_str(&run.stdout[start..]);
    reader.config_mut().trim_text(true);

    let mut open: Option<OpenCase> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"testcase" => {
                open = Some(OpenCase {
                    id: case_identity(&e),
                    status: TestStatus::Passed,
                    message: None,
                    in_detail: false,
                });
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"testcase" => {
                outcomes.record(TestOutcome::new(case_identity(&e), TestStatus::Passed, run.run_index));
            }
            Ok(Event::Start(e)) => {
                if let Some(case) = open.as_mut() {
                    case.in_detail = apply_detail(case, &e);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(case) = open.as_mut() {
                    apply_detail(case, &e);
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(case) = open.as_mut()
                    && case.in_detail
                    && case.message.is_none()
                    && case.status.is_failure()
                    && let Ok(body) = text.unescape()
                {
                    case.message = body
                        .lines()
                        .map(str::trim)
                        .find(|l| !l.is_empty())
                        .map(str::to_string);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"testcase" => {
                    if let Some(case) = open.take() {
                        outcomes.record(case.into_outcome(run.run_index));
                    }
                }
                b"failure" | b"error" | b"skipped" => {
                    if let Some(case) = open.as_mut() {
                        case.in_detail = false;
                    }
                }
                b"testsuites" => break,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                parsed.warn(
                    run.run_index,
                    None,
                    format!(
                        "malformed JUnit XML at byte {}: {}",
                        reader.buffer_position(),
                        e
                    ),
                );
                break;
            }
        }
    }

    parsed.outcomes = outcomes.into_vec();
    parsed
}
