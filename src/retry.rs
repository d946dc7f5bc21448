use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

use crate::{
    error::{BedError, Result},
    MAX_RETRIES, RETRY_DELAY,
};

/// Fixed-delay retry policy
///
/// Startup connection and runtime I/O share this shape but differ in what
/// exhaustion means: the former is fatal for the process, the latter is a
/// per-operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep between failed attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Attempt numbers, starting at 1
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts.max(1)
    }

    /// Whether `attempt` is the final one
    #[must_use]
    pub const fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Sleep before the next attempt; no-op after the final one
    pub async fn pause(&self, attempt: u32) {
        if !self.is_last(attempt) {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Worst-case time spent before giving up, given a per-attempt bound
    ///
    /// For runtime I/O the per-attempt bound is the connect timeout plus the
    /// I/O timeout.
    #[must_use]
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        per_attempt.saturating_mul(attempts) + self.delay.saturating_mul(attempts - 1)
    }

    /// Run `op` until it succeeds, retrying every error except
    /// configuration errors
    ///
    /// `label` names the operation in logs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error as soon as it occurs, otherwise the
    /// last error once every attempt has failed.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in self.attempts() {
            debug!("{} attempt {}/{}", label, attempt, self.max_attempts);
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_configuration_error() => return Err(e),
                Err(e) => {
                    if !self.is_last(attempt) {
                        warn!(
                            "{} failed on attempt {}/{}, retrying in {}ms: {}",
                            label,
                            attempt,
                            self.max_attempts,
                            self.delay.as_millis(),
                            e
                        );
                    }
                    last_error = Some(e);
                    self.pause(attempt).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BedError::Other(format!("{label} was never attempted"))))
    }
}
