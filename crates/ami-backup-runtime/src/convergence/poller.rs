//! Bounded polling of asynchronous provider state.
//!
//! The poller knows nothing about what it polls. A probe returns whether
//! the wait is over plus an observation; the poller keeps calling it,
//! sleeping between calls, until it reports done or the deadline passes.
//!
//! Timing contract:
//! - the probe runs once before any sleep
//! - no sleep follows a probe that reports done
//! - a wait that never converges ends after at least `timeout` and at
//!   most `ceil(timeout / interval)` probes
//! - the last observation is kept when the deadline passes

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use ami_backup_core::{effective_timeout, PollOutcome, DEFAULT_POLL_INTERVAL};

use crate::cancel::{Cancellation, Cancelled};

/// One probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe<V> {
    pub done: bool,
    pub observed: V,
}

impl<V> Probe<V> {
    pub fn done(observed: V) -> Self {
        Self {
            done: true,
            observed,
        }
    }

    pub fn pending(observed: V) -> Self {
        Self {
            done: false,
            observed,
        }
    }
}

/// Repeats a probe until it converges or a deadline elapses.
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    interval: Duration,
    timeout: Duration,
    cancellation: Cancellation,
}

impl Default for ConvergencePoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, Duration::ZERO)
    }
}

impl ConvergencePoller {
    /// Zero interval or timeout fall back to the defaults.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };

        Self {
            interval,
            timeout: effective_timeout(Some(timeout)),
            cancellation: Cancellation::never(),
        }
    }

    /// Abort waits when `cancellation` fires.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `probe` until it reports done or the timeout elapses.
    ///
    /// Probe errors end the wait immediately and are returned as-is; they
    /// are never retried here.
    pub async fn poll<V, E, F, Fut>(&self, mut probe: F) -> Result<PollOutcome<V>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<V>, E>>,
        E: From<Cancelled>,
    {
        let start = Instant::now();
        // None: the timeout reaches past what the clock can represent
        let deadline = start.checked_add(self.timeout);
        let expired = |now: Instant| deadline.is_some_and(|d| now >= d);
        let mut attempts: u32 = 0;

        loop {
            if self.cancellation.is_cancelled() {
                return Err(Cancelled.into());
            }

            let Probe { done, observed } = probe().await?;
            attempts += 1;

            if done {
                tracing::debug!(attempts, elapsed = ?start.elapsed(), "Converged");
                return Ok(PollOutcome::Converged {
                    observed,
                    elapsed: start.elapsed(),
                });
            }

            let now = Instant::now();
            if expired(now) {
                return Ok(self.timed_out(observed, start, attempts));
            }

            let nap = match deadline {
                Some(deadline) => self.interval.min(deadline - now),
                None => self.interval,
            };
            tracing::trace!(attempts, nap = ?nap, "Not converged, sleeping");
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = self.cancellation.cancelled() => return Err(Cancelled.into()),
            }

            if expired(Instant::now()) {
                return Ok(self.timed_out(observed, start, attempts));
            }
        }
    }

    fn timed_out<V>(&self, observed: V, start: Instant, attempts: u32) -> PollOutcome<V> {
        let elapsed = start.elapsed();
        tracing::warn!(
            attempts,
            elapsed = ?elapsed,
            timeout = ?self.timeout,
            "Deadline reached before convergence"
        );
        PollOutcome::TimedOut {
            last_observed: observed,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_converged_does_not_sleep() {
        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(60));
        let calls = counter();
        let start = Instant::now();

        let outcome = poller
            .poll(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Cancelled>(Probe::done("ready"))
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_converged());
        assert_eq!(*outcome.observed(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_some_polls() {
        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(600));
        let calls = counter();
        let start = Instant::now();

        let outcome = poller
            .poll(|| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, Cancelled>(Probe {
                        done: n == 3,
                        observed: n,
                    })
                }
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Converged {
                observed: 3,
                elapsed: Duration::from_secs(30)
            }
        );
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_last_observation() {
        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(60));
        let calls = counter();
        let start = Instant::now();

        let outcome = poller
            .poll(|| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, Cancelled>(Probe::pending(n))
                }
            })
            .await
            .unwrap();

        assert!(!outcome.is_converged());
        assert_eq!(*outcome.observed(), 4);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uneven_timeout_clamps_last_sleep() {
        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(50));
        let calls = counter();
        let start = Instant::now();

        let outcome = poller
            .poll(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Cancelled>(Probe::pending(()))
                }
            })
            .await
            .unwrap();

        assert!(!outcome.is_converged());
        assert_eq!(start.elapsed(), Duration::from_secs(50));
        assert_eq!(outcome.elapsed(), Duration::from_secs(50));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_stops_immediately() {
        #[derive(Debug, PartialEq)]
        enum ProbeError {
            Boom,
            Cancelled,
        }
        impl From<Cancelled> for ProbeError {
            fn from(_: Cancelled) -> Self {
                ProbeError::Cancelled
            }
        }

        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(60));
        let start = Instant::now();
        let result = poller
            .poll(|| async { Err::<Probe<()>, _>(ProbeError::Boom) })
            .await;

        assert_eq!(result.unwrap_err(), ProbeError::Boom);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let (handle, cancellation) = Cancellation::new();
        let poller = ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(3600))
            .with_cancellation(cancellation);

        let calls = counter();
        let task = tokio::spawn({
            let calls = calls.clone();
            async move {
                poller
                    .poll(|| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, Cancelled>(Probe::pending(()))
                        }
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_secs(40)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert_eq!(result.unwrap_err(), Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_deadline_still_polls() {
        let poller =
            ConvergencePoller::new(Duration::from_secs(15), Duration::from_secs(u64::MAX));
        let calls = counter();

        let outcome = poller
            .poll(|| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<_, Cancelled>(Probe {
                        done: n == 3,
                        observed: n,
                    })
                }
            })
            .await
            .unwrap();

        assert!(outcome.is_converged());
        assert_eq!(outcome.elapsed(), Duration::from_secs(30));
    }

    proptest::proptest! {
        #[test]
        fn prop_probe_count_is_ceil_of_timeout_over_interval(
            interval_secs in 1u64..120,
            timeout_secs in 1u64..1200,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let (calls, elapsed) = runtime.block_on(async {
                let poller = ConvergencePoller::new(
                    Duration::from_secs(interval_secs),
                    Duration::from_secs(timeout_secs),
                );
                let calls = counter();
                let outcome = poller
                    .poll(|| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, Cancelled>(Probe::pending(()))
                        }
                    })
                    .await
                    .unwrap();
                (calls.load(Ordering::SeqCst) as u64, outcome.elapsed())
            });

            proptest::prop_assert_eq!(calls, timeout_secs.div_ceil(interval_secs));
            proptest::prop_assert!(elapsed >= Duration::from_secs(timeout_secs));
        }
    }

    #[test]
    fn test_zero_settings_fall_back_to_defaults() {
        let poller = ConvergencePoller::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(poller.interval(), Duration::from_secs(15));
        assert_eq!(poller.timeout(), Duration::from_secs(28_800));
    }
}
