//! Deadline-bounded, cancellable polling.

use std::future::Future;
use std::time::Duration;

use berth_common::config::BerthConfig;
use berth_common::error::{BerthError, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often to check and how long to keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between checks.
    pub interval: Duration,
    /// Total budget measured from the first check.
    pub deadline: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Builds the default readiness policy from the global configuration.
    #[must_use]
    pub const fn from_config(config: &BerthConfig) -> Self {
        Self::new(config.poll_interval, config.start_timeout)
    }

    /// Returns a copy with a different deadline.
    #[must_use]
    pub const fn with_deadline(self, deadline: Duration) -> Self {
        Self { deadline, ..self }
    }
}

/// Runs `check` until it reports `true`.
///
/// The check runs at least once. An error from the check ends the poll with
/// that error; checks that should tolerate transient failures map them to
/// `Ok(false)` themselves.
///
/// # Errors
///
/// Returns [`BerthError::Timeout`] once the deadline elapses,
/// [`BerthError::Cancelled`] when `cancel` fires, or the check's own error.
pub async fn poll<F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    reference: &str,
    step: &'static str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + policy.deadline;
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(BerthError::Cancelled {
                reference: reference.to_string(),
                step,
            });
        }

        attempt += 1;
        if check().await? {
            debug!(reference, step, attempt, "poll satisfied");
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BerthError::Timeout {
                reference: reference.to_string(),
                step,
                after: policy.deadline,
            });
        }

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(BerthError::Cancelled {
                    reference: reference.to_string(),
                    step,
                });
            }
            () = tokio::time::sleep(policy.interval.min(deadline - now)) => {}
        }
    }
}
