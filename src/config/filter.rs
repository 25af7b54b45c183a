//! Ignore patterns over test identities.
//!
//! Patterns use shell glob syntax and must match the whole identity:
//!
//! | Syntax | Matches |
//! |--------|---------|
//! | `*` | any run of characters, including `/` and `::` |
//! | `?` | any single character |
//! | `[abc]`, `[a-z]` | one character from the set |
//! | `[!abc]` | one character not in the set |
//!
//! Everything else matches itself.

use regex::RegexSet;

use super::ConfigError;

/// A compiled set of ignore patterns.
///
/// # Example
///
/// ```
/// use flaky_detector::config::IgnoreFilter;
///
/// let filter = IgnoreFilter::new(&["tests/slow/*", "*::test_network_?"]).unwrap();
/// assert!(filter.is_ignored("tests/slow/test_big.py::test_load"));
/// assert!(filter.is_ignored("pkg::test_network_1"));
/// assert!(!filter.is_ignored("tests/unit/test_math.py::test_add"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    set: Option<RegexSet>,
    patterns: Vec<String>,
}

impl IgnoreFilter {
    /// Compiles `patterns`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPattern`] for an unterminated `[` set or an empty
    /// pattern.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }

        let mut sources = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            sources.push(glob_to_regex(pattern.as_ref())?);
        }
        let set = RegexSet::new(&sources).map_err(|e| ConfigError::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            set: Some(set),
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
        })
    }

    pub fn is_ignored(&self, test_id: &str) -> bool {
        self.set.as_ref().is_some_and(|set| set.is_match(test_id))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn glob_to_regex(pattern: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if pattern.trim().is_empty() {
        return Err(invalid("pattern is empty"));
    }

    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                let mut first = true;
                while let Some(c) = chars.next() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | ']' | '^' | '&' | '~' => {
                            class.push('\\');
                            class.push(c);
                        }
                        _ => class.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err(invalid("unterminated `[` set"));
                }
                class.push(']');
                out.push_str(&class);
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Ok(out)
}
