//! Condition Poller
//!
//! Turns asynchronous control-plane state changes into synchronous
//! checkpoints. A wait has no timeout; it ends when the predicate is
//! satisfied, when the predicate fails fatally, or when the session is
//! cancelled.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one evaluation of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Satisfied,
}

/// Poller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between two evaluations
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Blocking retry-until-true primitive
#[derive(Debug, Clone)]
pub struct ConditionPoller {
    config: PollerConfig,
    cancel: CancellationToken,
}

impl ConditionPoller {
    pub fn new(config: PollerConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Evaluate `check` now and then every interval until it is satisfied.
    ///
    /// Transient errors count as pending; any other error ends the wait.
    /// Returns the number of evaluations it took.
    pub async fn wait_for<F, Fut>(&self, description: &str, mut check: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.interrupted(description));
            }

            attempt += 1;
            match check().await {
                Ok(PollOutcome::Satisfied) => {
                    debug!(attempt, "{}: satisfied", description);
                    return Ok(attempt);
                }
                Ok(PollOutcome::Pending) => {
                    debug!(attempt, "{}: pending", description);
                }
                Err(e) if e.is_transient() => {
                    debug!(attempt, "{}: not visible yet ({})", description, e);
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.interrupted(description)),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    fn interrupted(&self, description: &str) -> Error {
        Error::Interrupted {
            during: format!("waiting for {}", description),
        }
    }
}
