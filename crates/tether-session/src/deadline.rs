//! Deadline wrapper.
//!
//! Races a pending operation against a timer. On expiry the operation is
//! dropped and a [`TimeoutError`] is returned; the underlying transport call
//! is not otherwise cancelled. Cancelling network calls is the job of the
//! client's abort registry.

use std::future::Future;
use std::time::Duration;

/// Default deadline for a data query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(8_000);

/// An operation did not settle before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Timeout: {label} ({deadline_ms}ms)")]
pub struct TimeoutError {
    /// What was being waited on.
    pub label: String,
    /// The deadline that expired.
    pub deadline_ms: u64,
}

impl TimeoutError {
    pub fn new(label: impl Into<String>, deadline: Duration) -> Self {
        Self {
            label: label.into(),
            deadline_ms: deadline.as_millis() as u64,
        }
    }
}

/// Run `future` with a deadline.
pub async fn with_timeout<F>(
    future: F,
    deadline: Duration,
    label: &str,
) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(output) => Ok(output),
        Err(_) => {
            tracing::debug!(label, deadline_ms = deadline.as_millis() as u64, "Deadline expired");
            Err(TimeoutError::new(label, deadline))
        }
    }
}

/// Run a query future with the default query deadline.
pub async fn with_query_timeout<F>(future: F, label: &str) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    with_timeout(future, DEFAULT_QUERY_TIMEOUT, label).await
}
