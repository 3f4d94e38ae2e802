//! Retry harness: bounded attempts under exponential backoff, with an
//! optional stop predicate and a hard deadline.
//!
//! The backoff is consumed as a stream of wait durations
//! ([`ExponentialBackoff::delays`]); the stream ending means "stop
//! retrying". The attempt bound is applied on top of the stream, and
//! `tokio::time::sleep` is the timer between attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StepError;

// ---------------------------------------------------------------------------
// ExponentialBackoff
// ---------------------------------------------------------------------------

/// Exponential backoff configuration.
///
/// `delays()` yields the waits between attempts: `initial_delay`, then
/// multiplied by `factor` per attempt, clamped to `max_delay`. The stream
/// ends once `max_elapsed` (measured from the first `delays()` pull) is
/// exceeded.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_elapsed: Option<Duration>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            factor: 1.5,
            max_delay: Duration::from_secs(60),
            max_elapsed: Some(Duration::from_secs(15 * 60)),
        }
    }
}

impl ExponentialBackoff {
    /// A constant delay between attempts, with no elapsed-time cutoff.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            factor: 1.0,
            max_delay: delay,
            max_elapsed: None,
        }
    }

    /// The stream of wait durations, freshly started.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let factor = self.factor.max(0.0);
        let max_secs = self.max_delay.as_secs_f64();
        let max_elapsed = self.max_elapsed;
        let started = Instant::now();
        let mut next_secs = self.initial_delay.as_secs_f64();
        std::iter::from_fn(move || {
            if max_elapsed.is_some_and(|cap| started.elapsed() > cap) {
                return None;
            }
            let delay = Duration::from_secs_f64(next_secs.min(max_secs));
            next_secs = (next_secs * factor).min(max_secs);
            Some(delay)
        })
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Predicate making a failure permanent: receives the ambient context, the
/// zero-based attempt number, the elapsed time since the first attempt,
/// and the error the attempt returned.
pub type StopPredicate =
    Arc<dyn Fn(&CancellationToken, u64, Duration, &StepError) -> bool + Send + Sync>;

/// Per-step retry policy. Without a policy a step runs a single attempt;
/// the default policy retries 5 times under exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Delay schedule between attempts.
    pub backoff: ExponentialBackoff,
    /// Maximum number of retries after the first attempt.
    pub max_attempts: u64,
    /// Optional escape hatch that turns an error permanent early.
    pub stop_if: Option<StopPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: ExponentialBackoff::default(),
            max_attempts: 5,
            stop_if: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` retries and the default backoff.
    pub fn attempts(max_attempts: u64) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Replace the backoff schedule.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Install a stop predicate.
    pub fn with_stop_if<F>(mut self, stop_if: F) -> Self
    where
        F: Fn(&CancellationToken, u64, Duration, &StepError) -> bool + Send + Sync + 'static,
    {
        self.stop_if = Some(Arc::new(stop_if));
        self
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .field("stop_if", &self.stop_if.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Drive `attempt_fn` until it succeeds, the attempt budget or backoff
/// stream is exhausted, the deadline passes after an attempt, or `stop_if`
/// makes the last error permanent. Returns the last error on failure.
pub(crate) async fn run_with_retry<F>(
    policy: &RetryPolicy,
    ctx: &CancellationToken,
    mut attempt_fn: F,
    not_after: Option<Instant>,
) -> Result<(), StepError>
where
    F: FnMut() -> BoxFuture<'static, Result<(), StepError>>,
{
    let mut delays = policy.backoff.delays().take(policy.max_attempts as usize);
    let started = Instant::now();
    let mut attempt: u64 = 0;
    loop {
        let err = match attempt_fn().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        let deadline_passed = not_after.is_some_and(|at| Instant::now() > at);
        let stopped = policy
            .stop_if
            .as_ref()
            .is_some_and(|stop| stop(ctx, attempt, started.elapsed(), &err));
        attempt += 1;
        if deadline_passed || stopped {
            return Err(err);
        }
        match delays.next() {
            Some(delay) => {
                tracing::debug!(attempt, ?delay, error = %err, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
            None => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
