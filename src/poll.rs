//! Fixed-interval polling of long-running operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::compute::{ComputeApi, OperationError, OperationHandle, RemoteApiError};

/// Errors raised while waiting for an operation to finish.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// The provider rejected a call with a non-transient error.
    #[error(transparent)]
    Api(#[from] RemoteApiError),
    /// The operation finished with an error payload.
    #[error("operation {operation} failed: {error}")]
    Failed {
        /// Provider operation name.
        operation: String,
        /// Error payload reported on completion.
        error: OperationError,
    },
    /// The run deadline passed before the operation finished.
    #[error("operation {operation} did not finish before the run deadline")]
    DeadlineExceeded {
        /// Provider operation name.
        operation: String,
    },
}

impl PollError {
    /// Returns the provider error when the failure came from an API call.
    #[must_use]
    pub const fn api_error(&self) -> Option<&RemoteApiError> {
        match self {
            Self::Api(err) => Some(err),
            Self::Failed { .. } | Self::DeadlineExceeded { .. } => None,
        }
    }
}

/// Far enough ahead to never elapse during a run.
const UNBOUNDED: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Deadline `limit` from now, clamped when the sum does not fit in an
/// [`Instant`].
#[must_use]
pub fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit)
        .or_else(|| now.checked_add(UNBOUNDED))
        .unwrap_or(now)
}

/// Re-fetches an operation at a fixed interval until it reports `Done`, and
/// repeats provider calls that fail transiently.
///
/// Transient errors are logged and retried until `deadline`; any other error
/// aborts the wait.
#[derive(Debug)]
pub struct OperationPoller<'a, C: ComputeApi> {
    compute: &'a C,
    interval: Duration,
    deadline: Instant,
}

impl<'a, C: ComputeApi> OperationPoller<'a, C> {
    /// Creates a poller bound to a run deadline.
    #[must_use]
    pub const fn new(compute: &'a C, interval: Duration, deadline: Instant) -> Self {
        Self {
            compute,
            interval,
            deadline,
        }
    }

    /// Issues `call` until it succeeds, fails permanently, or a transient
    /// failure arrives after the deadline.
    ///
    /// `call` must be safe to repeat; instance inserts stay so by reusing
    /// their request id.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient one once
    /// the deadline has passed.
    pub async fn retry<T, F, Fut>(&self, action: &str, mut call: F) -> Result<T, RemoteApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteApiError>>,
    {
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && Instant::now() < self.deadline => {
                    warn!(action, error = %err, "transient provider error; retrying");
                    sleep(self.interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Waits for `handle` to finish.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Failed`] when the completed operation carries an
    /// error payload, [`PollError::Api`] for non-transient provider errors, and
    /// [`PollError::DeadlineExceeded`] once the run deadline passes.
    pub async fn wait(&self, handle: OperationHandle) -> Result<OperationHandle, PollError> {
        let mut current = handle;
        loop {
            if current.is_done() {
                return match current.error.take() {
                    Some(error) => Err(PollError::Failed {
                        operation: current.name,
                        error,
                    }),
                    None => Ok(current),
                };
            }

            if Instant::now() >= self.deadline {
                return Err(PollError::DeadlineExceeded {
                    operation: current.name,
                });
            }

            sleep(self.interval).await;
            match self.compute.poll_operation(&current).await {
                Ok(next) => {
                    debug!(operation = %next.name, status = ?next.status, "polled operation");
                    current = next;
                }
                Err(err) if err.is_transient() => {
                    warn!(operation = %current.name, error = %err, "transient error while polling; retrying");
                }
                Err(err) => return Err(PollError::Api(err)),
            }
        }
    }
}
