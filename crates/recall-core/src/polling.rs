//! Bounded read-after-write verification polling.
//!
//! A probe is invoked up to `max_attempts` times with a fixed delay between
//! attempts. The delay goes through a [`PollClock`] so tests can run the loop
//! on virtual time, and every wait observes a [`CooperativeCancellationToken`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::cancellation::CooperativeCancellationToken;

const DEFAULT_POLL_MAX_ATTEMPTS: usize = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_500;
const DEFAULT_POLL_MAX_TOTAL_WAIT_MS: u64 = 15_000;

/// Attempt budget and cadence for one verification loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: usize,
    pub interval: Duration,
    pub max_total_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_total_wait: Duration::from_millis(DEFAULT_POLL_MAX_TOTAL_WAIT_MS),
        }
    }
}

/// Source of inter-attempt delays.
#[async_trait]
pub trait PollClock: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Production clock backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPollClock;

#[async_trait]
impl PollClock for TokioPollClock {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Virtual clock that returns immediately and records the time it was asked to wait.
#[derive(Debug, Default)]
pub struct VirtualPollClock {
    slept_ms: AtomicU64,
    sleeps: AtomicUsize,
}

impl VirtualPollClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total virtual time waited so far.
    pub fn total_slept(&self) -> Duration {
        Duration::from_millis(self.slept_ms.load(Ordering::SeqCst))
    }

    /// Number of sleeps requested so far.
    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollClock for VirtualPollClock {
    async fn sleep(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.slept_ms.fetch_add(millis, Ordering::SeqCst);
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

/// Terminal state of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Converged { value: T, attempts: usize },
    Exhausted { attempts: usize },
    Cancelled { attempts: usize },
}

/// Runs `probe` until it yields `Some`, the budget is spent, or `token` fires.
///
/// Probe errors abort the loop immediately; they are never retried here.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    clock: &dyn PollClock,
    token: Option<&CooperativeCancellationToken>,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut waited = Duration::ZERO;
    let mut attempts = 0usize;

    while attempts < max_attempts {
        if token.map(CooperativeCancellationToken::is_cancelled).unwrap_or(false) {
            return Ok(PollOutcome::Cancelled { attempts });
        }

        attempts += 1;
        if let Some(value) = probe(attempts).await? {
            return Ok(PollOutcome::Converged { value, attempts });
        }
        tracing::debug!(attempt = attempts, max_attempts, "verification probe not converged");

        if attempts >= max_attempts {
            break;
        }
        if waited.saturating_add(policy.interval) > policy.max_total_wait {
            break;
        }

        match token {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Ok(PollOutcome::Cancelled { attempts }),
                    _ = clock.sleep(policy.interval) => {}
                }
            }
            None => clock.sleep(policy.interval).await,
        }
        waited = waited.saturating_add(policy.interval);
    }

    Ok(PollOutcome::Exhausted { attempts })
}
