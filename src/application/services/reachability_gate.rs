//! Connectivity-aware retry wrapper for best-effort background work.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::Reachability;

/// Retry schedule for [`ReachabilityGate::run_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Guarded attempts before the final unconditional run.
    pub max_attempts: u32,
    /// Wait before the first attempt while unreachable; doubled per attempt.
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(400),
        }
    }
}

impl BackoffPolicy {
    /// Wait ahead of attempt `attempt` (1-based) when the network is down.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_delay.saturating_mul(factor)
    }
}

/// How a [`ReachabilityGate::run_with_backoff`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// Another run was already in progress; `work` was not invoked.
    Skipped,
    /// `work` succeeded on a guarded attempt.
    Succeeded {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// `work` failed with an error that retrying cannot fix.
    Abandoned {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Guarded attempts were exhausted; `work` ran once more regardless.
    BestEffort,
}

/// Runs lossy background work only when the network looks reachable.
///
/// At most one run is active per gate; overlapping calls return
/// [`BackoffOutcome::Skipped`] instead of queueing.
#[derive(Debug)]
pub struct ReachabilityGate {
    reachability: watch::Receiver<Reachability>,
    policy: BackoffPolicy,
    running: AtomicBool,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReachabilityGate {
    /// Creates a gate with the default 3-attempt, 0.4 s doubling policy.
    #[must_use]
    pub fn new(reachability: watch::Receiver<Reachability>) -> Self {
        Self::with_policy(reachability, BackoffPolicy::default())
    }

    /// Creates a gate with a custom retry schedule.
    #[must_use]
    pub const fn with_policy(
        reachability: watch::Receiver<Reachability>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            reachability,
            policy,
            running: AtomicBool::new(false),
        }
    }

    /// Last observed reachability.
    #[must_use]
    pub fn reachability(&self) -> Reachability {
        *self.reachability.borrow()
    }

    /// Returns true only once a probe has confirmed the network is up.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachability().is_reachable()
    }

    /// Returns true while a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Invokes `work` under the backoff policy, retrying every error.
    ///
    /// See [`run_with_backoff_filtered`](Self::run_with_backoff_filtered).
    pub async fn run_with_backoff<F, Fut, E>(&self, work: F) -> BackoffOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.run_with_backoff_filtered(work, |_| true).await
    }

    /// Invokes `work` under the backoff policy.
    ///
    /// Each guarded attempt first waits out the current delay if the network
    /// is not known to be reachable, then runs `work`. The delay doubles per
    /// attempt (0.4 s, 0.8 s, 1.6 s by default). Once the attempts are used
    /// up, `work` runs one last time without any wait and its error, if any,
    /// is only logged. `work` is therefore invoked at most `max_attempts + 1`
    /// times.
    ///
    /// An error for which `is_retryable` returns false ends the run at once
    /// with [`BackoffOutcome::Abandoned`].
    pub async fn run_with_backoff_filtered<F, Fut, E, R>(
        &self,
        work: F,
        is_retryable: R,
    ) -> BackoffOutcome
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Backoff run already in progress, skipping");
            return BackoffOutcome::Skipped;
        }
        let _guard = RunGuard(&self.running);

        for attempt in 1..=self.policy.max_attempts {
            if !self.is_reachable() {
                let delay = self.policy.delay_before(attempt);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Network unreachable, waiting before attempt"
                );
                sleep(delay).await;
            }

            match work().await {
                Ok(()) => {
                    debug!(attempt, "Background work succeeded");
                    return BackoffOutcome::Succeeded { attempt };
                }
                Err(e) if !is_retryable(&e) => {
                    warn!(attempt, error = %e, "Background work failed permanently");
                    return BackoffOutcome::Abandoned { attempt };
                }
                Err(e) => warn!(attempt, error = %e, "Background work failed"),
            }
        }

        info!(
            attempts = self.policy.max_attempts,
            "Backoff exhausted, running background work once more"
        );
        if let Err(e) = work().await {
            warn!(error = %e, "Best-effort background work failed");
        }
        BackoffOutcome::BestEffort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use test_case::test_case;
    use tokio::time::Instant;

    use crate::domain::FeedError;

    fn gate(initial: Reachability) -> (watch::Sender<Reachability>, ReachabilityGate) {
        let (tx, rx) = watch::channel(initial);
        (tx, ReachabilityGate::new(rx))
    }

    fn counting_work(
        calls: &Arc<AtomicU32>,
        succeed_on: Option<u32>,
    ) -> impl Fn() -> std::future::Ready<Result<(), String>> + '_ {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(match succeed_on {
                Some(target) if n >= target => Ok(()),
                _ => Err(format!("call {n} failed")),
            })
        }
    }

    #[test_case(1, Duration::from_millis(400) ; "first")]
    #[test_case(2, Duration::from_millis(800) ; "second")]
    #[test_case(3, Duration::from_millis(1600) ; "third")]
    fn test_delay_doubles(attempt: u32, expected: Duration) {
        assert_eq!(BackoffPolicy::default().delay_before(attempt), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_waits_then_attempts() {
        let (_tx, gate) = gate(Reachability::Unreachable);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = gate.run_with_backoff(counting_work(&calls, None)).await;

        assert_eq!(outcome, BackoffOutcome::BestEffort);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(2800));
        assert!(!gate.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_success_after_first_wait() {
        let (_tx, gate) = gate(Reachability::Unreachable);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = gate.run_with_backoff(counting_work(&calls, Some(1))).await;

        assert_eq!(outcome, BackoffOutcome::Succeeded { attempt: 1 });
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_is_bounded() {
        let (_tx, gate) = gate(Reachability::Reachable);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = gate.run_with_backoff(counting_work(&calls, None)).await;

        assert_eq!(outcome, BackoffOutcome::BestEffort);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_retry() {
        let (_tx, gate) = gate(Reachability::Reachable);
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = gate.run_with_backoff(counting_work(&calls, Some(2))).await;

        assert_eq!(outcome, BackoffOutcome::Succeeded { attempt: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachability_change_mid_run() {
        let (tx, gate) = gate(Reachability::Unknown);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            let _ = tx.send(Reachability::Reachable);
            sleep(Duration::from_secs(10)).await;
        });

        let outcome = gate.run_with_backoff(counting_work(&calls, Some(2))).await;

        // Only the first attempt waits; the second runs as soon as the first fails.
        assert_eq!(outcome, BackoffOutcome::Succeeded { attempt: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[test_case(FeedError::HttpStatus { status: 404 }, 1, BackoffOutcome::Abandoned { attempt: 1 } ; "not_found_stops")]
    #[test_case(FeedError::parse("not json"), 1, BackoffOutcome::Abandoned { attempt: 1 } ; "parse_error_stops")]
    #[test_case(FeedError::HttpStatus { status: 503 }, 4, BackoffOutcome::BestEffort ; "unavailable_retries")]
    #[test_case(FeedError::network("reset"), 4, BackoffOutcome::BestEffort ; "network_error_retries")]
    #[tokio::test(start_paused = true)]
    async fn test_permanent_feed_errors_end_early(
        error: FeedError,
        expected_calls: u32,
        expected: BackoffOutcome,
    ) {
        let (_tx, gate) = gate(Reachability::Reachable);
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = gate
            .run_with_backoff_filtered(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Err::<(), _>(error.clone()))
                },
                FeedError::is_retryable,
            )
            .await;

        assert_eq!(outcome, expected);
        assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
        assert!(!gate.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_is_skipped() {
        let (_tx, gate) = gate(Reachability::Reachable);
        let slow_calls = Arc::new(AtomicU32::new(0));
        let fast_calls = Arc::new(AtomicU32::new(0));

        let slow = gate.run_with_backoff(|| {
            slow_calls.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_secs(1)).await;
                Ok::<(), String>(())
            }
        });
        let fast = gate.run_with_backoff(counting_work(&fast_calls, Some(1)));

        let (first, second) = tokio::join!(slow, fast);

        assert_eq!(first, BackoffOutcome::Succeeded { attempt: 1 });
        assert_eq!(second, BackoffOutcome::Skipped);
        assert_eq!(fast_calls.load(Ordering::SeqCst), 0);

        let again = gate.run_with_backoff(counting_work(&fast_calls, Some(1))).await;
        assert_eq!(again, BackoffOutcome::Succeeded { attempt: 1 });
    }
}
