//! Bounded retry wrapper for remote calls
//!
//! A remote call is repeated while it reports a retryable failure and the
//! policy's wall-clock ceiling has not been reached. Read-class and
//! write-class calls use different ceilings (see [`crate::config::Timeouts`]).

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::Retryable;

/// Delay strategy between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same interval before every retry
    Fixed,
    /// Interval multiplied after every retry, capped at `max_interval`
    Exponential { multiplier: f64, max_interval: Duration },
}

/// Retry policy for a single remote call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling on the cumulative time spent in the call, sleeps included
    pub max_duration: Duration,
    /// Delay before the first retry
    pub interval: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_duration: Duration, interval: Duration) -> Self {
        Self {
            max_duration,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to sleep after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                multiplier,
                max_interval,
            } => {
                let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
                let secs = self.interval.as_secs_f64() * factor;
                if !secs.is_finite() || secs >= max_interval.as_secs_f64() {
                    *max_interval
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The call succeeded
    Done(T),
    /// Transient failure; try again
    Retry(E),
    /// Non-retryable failure; give up immediately
    Abort(E),
}

impl<T, E> Attempt<T, E> {
    /// Sort a plain `Result` into an attempt using a retryable predicate
    pub fn from_result(result: Result<T, E>, retryable: impl Fn(&E) -> bool) -> Self {
        match result {
            Ok(v) => Attempt::Done(v),
            Err(e) if retryable(&e) => Attempt::Retry(e),
            Err(e) => Attempt::Abort(e),
        }
    }
}

/// Failure of a retried call
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The ceiling elapsed while the call kept failing with retryable errors
    #[error("timed out after {elapsed:?} and {attempts} attempts, last error: {last}")]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        last: E,
    },
    /// The call failed with a non-retryable error
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    /// The underlying error of the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Timeout { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }
}

/// Run `op` until it is done, aborts, or the policy's ceiling elapses
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let err = match op().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(e) => return Err(RetryError::Permanent(e)),
            Attempt::Retry(e) => e,
        };

        let elapsed = start.elapsed();
        if elapsed >= policy.max_duration {
            warn!(
                "giving up after {} attempts in {:?}: {}",
                attempts, elapsed, err
            );
            return Err(RetryError::Timeout {
                elapsed,
                attempts,
                last: err,
            });
        }

        let remaining = policy.max_duration - elapsed;
        let delay = policy.delay_for_attempt(attempts - 1).min(remaining);
        debug!(
            "attempt {} failed with retryable error, retrying in {:?}: {}",
            attempts, delay, err
        );
        tokio::time::sleep(delay).await;
    }
}

/// Retry a `Result`-returning call, treating errors matched by `retryable` as transient
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    retry(policy, || {
        let fut = op();
        let retryable = &retryable;
        async move { Attempt::from_result(fut.await, retryable) }
    })
    .await
}

/// Retry a call whose error type knows its own retryability
pub async fn retry_api<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    retry_if(policy, |e: &E| e.is_retryable(), op).await
}
