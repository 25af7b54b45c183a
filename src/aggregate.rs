//! Folding per-run outcomes into per-test statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::framework::TestOutcome;
use crate::severity::{Severity, classify};

/// Outcomes parsed from one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcomes {
    pub run_index: usize,
    pub outcomes: Vec<TestOutcome>,
}

/// Pass/fail statistics of one test across all runs that reported it.
///
/// `passes + failures == observed_runs` always holds. Runs in which the test
/// was absent or only skipped are not observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakinessStats {
    pub test_id: String,
    pub observed_runs: usize,
    pub passes: usize,
    pub failures: usize,
    /// `100 * failures / observed_runs`, in `[0, 100]`.
    pub failure_percentage: f64,
    pub severity: Severity,
    /// Run indices in which the test failed, ascending.
    pub failed_runs: Vec<usize>,
    /// Message of the failure with the lowest run index.
    pub first_failure: Option<String>,
}

impl FlakinessStats {
    fn new(test_id: String) -> Self {
        Self {
            test_id,
            observed_runs: 0,
            passes: 0,
            failures: 0,
            failure_percentage: 0.0,
            severity: Severity::Stable,
            failed_runs: Vec::new(),
            first_failure: None,
        }
    }

    fn finish(&mut self) {
        self.failure_percentage = if self.observed_runs == 0 {
            0.0
        } else {
            100.0 * self.failures as f64 / self.observed_runs as f64
        };
        self.severity = classify(self.failure_percentage);
    }
}

/// Result of aggregating a job's runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    /// Statistics per test identity. Tests that were only ever skipped are
    /// absent.
    pub stats: BTreeMap<String, FlakinessStats>,
    /// Runs that contributed no outcome at all.
    pub silent_runs: BTreeSet<usize>,
}

/// One run's verdict on one test.
#[derive(Debug, Default)]
struct Observation {
    failed: bool,
    counted: bool,
    message: Option<String>,
}

/// Groups outcomes by test identity and computes [`FlakinessStats`].
///
/// Within a run, all records of a test form a single observation that is a
/// failure if any record failed. Results are independent of the order in
/// which `runs` is given.
pub fn aggregate(runs: &[RunOutcomes]) -> Aggregation {
    let mut ordered: Vec<&RunOutcomes> = runs.iter().collect();
    ordered.sort_by_key(|r| r.run_index);

    let mut aggregation = Aggregation::default();

    for run in ordered {
        if run.outcomes.is_empty() {
            aggregation.silent_runs.insert(run.run_index);
            continue;
        }

        let mut per_test: BTreeMap<&str, Observation> = BTreeMap::new();
        for outcome in &run.outcomes {
            let obs = per_test.entry(outcome.test_id.as_str()).or_default();
            if !outcome.status.is_countable() {
                continue;
            }
            obs.counted = true;
            if outcome.status.is_failure() {
                obs.failed = true;
                if obs.message.is_none() {
                    obs.message = outcome.message.clone();
                }
            }
        }

        for (test_id, obs) in per_test {
            if !obs.counted {
                continue;
            }
            let stats = aggregation
                .stats
                .entry(test_id.to_string())
                .or_insert_with(|| FlakinessStats::new(test_id.to_string()));
            stats.observed_runs += 1;
            if obs.failed {
                stats.failures += 1;
                stats.failed_runs.push(run.run_index);
                if stats.first_failure.is_none() {
                    stats.first_failure = obs.message;
                }
            } else {
                stats.passes += 1;
            }
        }
    }

    for stats in aggregation.stats.values_mut() {
        stats.finish();
    }
    aggregation
}
