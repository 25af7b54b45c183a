//! Severity classification of failure percentages.
//!
//! | Failure percentage | Severity |
//! |--------------------|----------|
//! | 0 | `STABLE` |
//! | (0, 25) | `LOW` |
//! | [25, 50) | `MEDIUM` |
//! | [50, 90) | `HIGH` |
//! | [90, 100] | `CRITICAL` |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower edge of the `MEDIUM` band.
pub const MEDIUM_THRESHOLD: f64 = 25.0;

/// Lower edge of the `HIGH` band.
pub const HIGH_THRESHOLD: f64 = 50.0;

/// Lower edge of the `CRITICAL` band.
pub const CRITICAL_THRESHOLD: f64 = 90.0;

/// How flaky a test is, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Stable,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Anything other than `Stable` failed at least once.
    pub fn is_flaky(&self) -> bool {
        *self != Severity::Stable
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Stable => "STABLE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a failure percentage in `[0, 100]` to its severity band.
///
/// Bands include their lower edge. `NaN` is treated as 0.
///
/// # Example
///
/// ```
/// use flaky_detector::severity::{Severity, classify};
///
/// assert_eq!(classify(0.0), Severity::Stable);
/// assert_eq!(classify(50.0), Severity::High);
/// ```
pub fn classify(failure_percentage: f64) -> Severity {
    match failure_percentage {
        p if p >= CRITICAL_THRESHOLD => Severity::Critical,
        p if p >= HIGH_THRESHOLD => Severity::High,
        p if p >= MEDIUM_THRESHOLD => Severity::Medium,
        p if p > 0.0 => Severity::Low,
        _ => Severity::Stable,
    }
}
