//! Status-polling reconciliation loop
//!
//! Remote control planes accept create/update/delete requests synchronously
//! and complete them asynchronously. [`wait_for`] re-describes the object at a
//! fixed interval until it reaches a terminal state for the requested
//! [`Target`], or the wall-clock budget runs out.
//!
//! Products map their raw status strings into the closed [`Lifecycle`] set at
//! the service boundary (see [`ProductStatus`]), so this loop never compares
//! status strings itself.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::Retryable;

/// Product-agnostic meaning of a remote status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Transient: creating, modifying, deleting, ...
    Pending,
    /// Settled and usable
    Running,
    /// Terminal and no longer present (e.g. a terminated instance)
    Gone,
    /// Terminal failure reported by the remote object
    Failed(String),
    /// A status string the product does not know about
    Unrecognized(String),
}

/// A product-specific status that can be read by the reconciliation loop
pub trait ProductStatus {
    fn lifecycle(&self) -> Lifecycle;

    /// The raw status as reported by the remote API
    fn raw(&self) -> String;
}

/// Terminal condition the loop waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The object exists and is running
    Present,
    /// The object no longer exists
    Absent,
}

/// Polling parameters for one wait
#[derive(Debug, Clone, PartialEq)]
pub struct WaitSpec {
    /// Overall budget, measured from the first poll
    pub timeout: Duration,
    /// Delay between polls
    pub interval: Duration,
    /// How long "not found" is tolerated before an object is first seen
    pub not_found_grace: Duration,
    pub target: Target,
}

impl WaitSpec {
    pub fn present(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            not_found_grace: interval.saturating_mul(6),
            target: Target::Present,
        }
    }

    pub fn absent(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            not_found_grace: Duration::ZERO,
            target: Target::Absent,
        }
    }

    pub fn with_not_found_grace(mut self, grace: Duration) -> Self {
        self.not_found_grace = grace;
        self
    }

    /// Charge the time spent since `start` against the budget
    ///
    /// Used when the wait is the second phase of an operation whose first
    /// phase (the request wait) draws on the same ceiling. At least one poll
    /// is still made once the budget is spent.
    pub fn remaining_since(mut self, start: Instant) -> Self {
        self.timeout = self.timeout.saturating_sub(start.elapsed());
        self
    }
}

/// Result of a converged wait
#[derive(Debug, Clone, PartialEq)]
pub struct Converged<S> {
    /// Last observed status; `None` when the object was last seen as absent
    pub status: Option<S>,
    /// Number of describe calls made
    pub polls: u32,
}

/// Why a wait did not converge
#[derive(Debug, Error)]
pub enum WaitError<E> {
    #[error("timed out after {elapsed:?} waiting for {operation} (last status: {})", last_status.as_deref().unwrap_or("not found"))]
    Timeout {
        operation: String,
        elapsed: Duration,
        last_status: Option<String>,
    },

    #[error("{operation} failed with status '{status}': {reason}")]
    TerminalFailure {
        operation: String,
        status: String,
        reason: String,
    },

    #[error("{operation} reached unexpected status '{status}'")]
    UnexpectedStatus { operation: String, status: String },

    #[error("{operation}: object disappeared (last status: {})", last_status.as_deref().unwrap_or("never seen"))]
    Vanished {
        operation: String,
        last_status: Option<String>,
    },

    #[error("{operation}: describe failed: {error}")]
    Describe { operation: String, error: E },
}

impl<E> WaitError<E> {
    /// Status string most recently seen before the failure, if any
    pub fn last_status(&self) -> Option<&str> {
        match self {
            WaitError::Timeout { last_status, .. } | WaitError::Vanished { last_status, .. } => {
                last_status.as_deref()
            }
            WaitError::TerminalFailure { status, .. } | WaitError::UnexpectedStatus { status, .. } => {
                Some(status)
            }
            WaitError::Describe { .. } => None,
        }
    }
}

enum Step<S> {
    Done(Option<S>),
    Continue(Option<String>),
}

/// Poll `probe` until the object converges on `spec.target`
///
/// `probe` returns `Ok(None)` when the object is not found. Retryable describe
/// errors are tolerated until the budget runs out; any other describe error
/// aborts the wait.
pub async fn wait_for<S, E, F, Fut>(
    operation: &str,
    spec: &WaitSpec,
    mut probe: F,
) -> Result<Converged<S>, WaitError<E>>
where
    S: ProductStatus,
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<S>, E>>,
{
    let start = Instant::now();
    let mut polls: u32 = 0;
    let mut seen = false;
    let mut last_status: Option<String> = None;

    loop {
        polls += 1;
        let observed = probe().await;

        let step = match observed {
            Err(e) if e.is_retryable() => {
                debug!("{}: retryable describe error: {}", operation, e);
                Step::Continue(last_status.clone())
            }
            Err(e) => {
                return Err(WaitError::Describe {
                    operation: operation.to_string(),
                    error: e,
                });
            }
            Ok(None) => match spec.target {
                Target::Absent => Step::Done(None),
                Target::Present if !seen && start.elapsed() <= spec.not_found_grace => {
                    debug!("{}: not visible yet", operation);
                    Step::Continue(None)
                }
                Target::Present => {
                    return Err(WaitError::Vanished {
                        operation: operation.to_string(),
                        last_status,
                    });
                }
            },
            Ok(Some(status)) => {
                seen = true;
                let raw = status.raw();
                match (status.lifecycle(), spec.target) {
                    (Lifecycle::Running, Target::Present) => Step::Done(Some(status)),
                    (Lifecycle::Gone, Target::Absent) => Step::Done(Some(status)),
                    (Lifecycle::Gone, Target::Present) => {
                        return Err(WaitError::Vanished {
                            operation: operation.to_string(),
                            last_status: Some(raw),
                        });
                    }
                    (Lifecycle::Pending, _) | (Lifecycle::Running, Target::Absent) => {
                        Step::Continue(Some(raw))
                    }
                    (Lifecycle::Failed(reason), _) => {
                        warn!("{}: terminal status '{}': {}", operation, raw, reason);
                        return Err(WaitError::TerminalFailure {
                            operation: operation.to_string(),
                            status: raw,
                            reason,
                        });
                    }
                    (Lifecycle::Unrecognized(_), _) => {
                        return Err(WaitError::UnexpectedStatus {
                            operation: operation.to_string(),
                            status: raw,
                        });
                    }
                }
            }
        };

        match step {
            Step::Done(status) => {
                info!(
                    "{}: converged after {} poll(s) in {:?}",
                    operation,
                    polls,
                    start.elapsed()
                );
                return Ok(Converged { status, polls });
            }
            Step::Continue(status) => {
                if status.is_some() {
                    last_status = status;
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= spec.timeout {
            return Err(WaitError::Timeout {
                operation: operation.to_string(),
                elapsed,
                last_status,
            });
        }

        debug!(
            "{}: status {}, polling again in {:?}",
            operation,
            last_status.as_deref().unwrap_or("not found"),
            spec.interval
        );
        tokio::time::sleep(spec.interval.min(spec.timeout - elapsed)).await;
    }
}
