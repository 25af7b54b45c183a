//! Bounded-concurrency dispatch of runs.
//!
//! The scheduler starts `min(parallelism, runs)` workers. Each worker claims
//! the next unclaimed run index, executes it, reports it and loops, so a
//! slow run never holds back the runs queued behind a fast one. Workers
//! stop claiming once the cancellation token fires.
//!
//! # Example
//!
//! ```no_run
//! use flaky_detector::executor::{Command, LocalExecutor, RunRequest};
//! use flaky_detector::orchestrator::Scheduler;
//! use flaky_detector::report::NullReporter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let requests: Vec<RunRequest> = (0..8)
//!     .map(|i| RunRequest {
//!         run_index: i,
//!         seed: i as u64,
//!         command: Command::new("true"),
//!     })
//!     .collect();
//!
//! let outcome = Scheduler::new(4)
//!     .run(&LocalExecutor::new(), &requests, &CancellationToken::new(), &NullReporter)
//!     .await;
//! assert_eq!(outcome.results.len(), 8);
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::executor::{CompletionState, RunExecutor, RunRequest, RunResult};
use crate::report::Reporter;

/// Runs a job's requests with at most `parallelism` in flight.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    parallelism: usize,
}

/// What the scheduler collected.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// One result per finished run, ordered by run index.
    pub results: Vec<RunResult>,
    /// Whether the token fired before every run was launched or finished.
    pub cancelled: bool,
}

impl Scheduler {
    /// Creates a scheduler. Values below 1 are clamped to 1.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Executes every request, returning when all launched runs have
    /// finished.
    ///
    /// A failing run never affects another: executors map failures onto
    /// [`CompletionState`]s. Runs cut short by cancellation are absent from
    /// the results.
    pub async fn run<E, R>(
        &self,
        executor: &E,
        requests: &[RunRequest],
        cancel: &CancellationToken,
        reporter: &R,
    ) -> ScheduleOutcome
    where
        E: RunExecutor + ?Sized,
        R: Reporter + ?Sized,
    {
        if requests.is_empty() {
            return ScheduleOutcome::default();
        }

        let workers = self.parallelism.min(requests.len());
        let next = AtomicUsize::new(0);
        let collected: Mutex<Vec<RunResult>> = Mutex::new(Vec::with_capacity(requests.len()));

        debug!(
            "Dispatching {} runs across {} workers",
            requests.len(),
            workers
        );

        tokio_scoped::scope(|scope| {
            for worker in 0..workers {
                let next = &next;
                let collected = &collected;

                scope.spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let slot = next.fetch_add(1, Ordering::SeqCst);
                        let Some(request) = requests.get(slot) else {
                            break;
                        };

                        debug!(
                            "Worker {} starting run {} (seed {})",
                            worker, request.run_index, request.seed
                        );
                        let Some(result) = executor.execute(request, cancel).await else {
                            debug!("Run {} cancelled in flight", request.run_index);
                            break;
                        };

                        match result.state {
                            CompletionState::Completed => {}
                            CompletionState::TimedOut => {
                                warn!("Run {} timed out", result.run_index)
                            }
                            CompletionState::ProcessError => warn!(
                                "Run {} failed to execute: {}",
                                result.run_index,
                                result.error.as_deref().unwrap_or("unknown error")
                            ),
                        }

                        reporter.on_run_complete(&result).await;
                        collected.lock().await.push(result);
                    }
                });
            }
        });

        let mut results = collected.into_inner();
        results.sort_by_key(|r| r.run_index);

        let cancelled = cancel.is_cancelled() && results.len() < requests.len();
        ScheduleOutcome { results, cancelled }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::executor::Command;
    use crate::report::NullReporter;

    fn requests(n: usize) -> Vec<RunRequest> {
        (0..n)
            .map(|i| RunRequest {
                run_index: i,
                seed: 100 + i as u64,
                command: Command::new("stub"),
            })
            .collect()
    }

    /// Sleeps briefly and tracks how many runs are in flight at once.
    #[derive(Default)]
    struct CountingExecutor {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_run: Option<usize>,
    }

    #[async_trait]
    impl RunExecutor for CountingExecutor {
        async fn execute(&self, request: &RunRequest, _cancel: &CancellationToken) -> Option<RunResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_run == Some(request.run_index) {
                return Some(RunResult::process_error(
                    request.run_index,
                    request.seed,
                    "spawn failed",
                ));
            }
            Some(RunResult::completed(
                request.run_index,
                request.seed,
                Some(0),
                format!("run {}", request.run_index),
                String::new(),
            ))
        }
    }

    /// Cancels the job once the given run has finished.
    struct CancellingExecutor {
        cancel_after: usize,
    }

    #[async_trait]
    impl RunExecutor for CancellingExecutor {
        async fn execute(&self, request: &RunRequest, cancel: &CancellationToken) -> Option<RunResult> {
            if request.run_index == self.cancel_after {
                cancel.cancel();
            }
            Some(RunResult::completed(
                request.run_index,
                request.seed,
                Some(0),
                String::new(),
                String::new(),
            ))
        }
    }

    #[test]
    fn test_parallelism_is_clamped() {
        assert_eq!(Scheduler::new(0).parallelism(), 1);
        assert_eq!(Scheduler::new(6).parallelism(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_run_executes_exactly_once() {
        let executor = CountingExecutor::default();
        let outcome = Scheduler::new(3)
            .run(&executor, &requests(10), &CancellationToken::new(), &NullReporter)
            .await;

        let indices: Vec<_> = outcome.results.iter().map(|r| r.run_index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
        assert!(!outcome.cancelled);
        for r in &outcome.results {
            assert_eq!(r.seed, 100 + r.run_index as u64);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_parallelism() {
        let executor = CountingExecutor::default();
        Scheduler::new(2)
            .run(&executor, &requests(8), &CancellationToken::new(), &NullReporter)
            .await;
        let peak = executor.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak in flight was {peak}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_run_does_not_affect_others() {
        let executor = CountingExecutor {
            fail_run: Some(3),
            ..Default::default()
        };
        let outcome = Scheduler::new(4)
            .run(&executor, &requests(6), &CancellationToken::new(), &NullReporter)
            .await;

        assert_eq!(outcome.results.len(), 6);
        let errors: BTreeSet<_> = outcome
            .results
            .iter()
            .filter(|r| r.state == CompletionState::ProcessError)
            .map(|r| r.run_index)
            .collect();
        assert_eq!(errors, BTreeSet::from([3]));
        assert!(outcome.results[4].success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_stops_new_launches() {
        let cancel = CancellationToken::new();
        let outcome = Scheduler::new(1)
            .run(&CancellingExecutor { cancel_after: 2 }, &requests(10), &cancel, &NullReporter)
            .await;

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_request_list() {
        let outcome = Scheduler::new(4)
            .run(&CountingExecutor::default(), &[], &CancellationToken::new(), &NullReporter)
            .await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.cancelled);
    }
}
