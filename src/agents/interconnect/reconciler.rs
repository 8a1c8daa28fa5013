//! Status Reconciler
//!
//! Polls provider state until a predicate holds, absorbing transient
//! errors with backoff and honouring timeouts and cancellation.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::InterconnectError;

/// Polling behaviour for a single wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// Lower bound on the delay between polls, protects provider rate limits
    pub poll_floor: Duration,
    /// Upper bound on the backed-off delay after transient errors
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            poll_floor: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
            timeout: Duration::from_secs(45 * 60),
        }
    }
}

impl WaitPolicy {
    fn base_delay(&self) -> Duration {
        self.poll_interval.max(self.poll_floor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Number of predicate evaluations, including the successful one
    pub polls: u32,
    pub elapsed: Duration,
}

/// Evaluate `predicate` until it returns `Ok(true)`.
///
/// Transient errors double the next delay (capped at `max_backoff`);
/// a clean poll resets it. Any other error ends the wait immediately.
pub async fn wait_until<F, Fut>(
    label: &str,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
    mut predicate: F,
) -> Result<WaitOutcome, InterconnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, InterconnectError>>,
{
    let started = Instant::now();
    let base = policy.base_delay();
    let ceiling = policy.max_backoff.max(base);
    let mut delay = base;
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(InterconnectError::Cancelled);
        }

        polls += 1;
        match predicate().await {
            Ok(true) => {
                let elapsed = started.elapsed();
                debug!(wait = %label, polls, elapsed_ms = elapsed.as_millis() as u64, "Condition met");
                return Ok(WaitOutcome { polls, elapsed });
            }
            Ok(false) => delay = base,
            Err(e) if e.is_transient() => {
                delay = delay.saturating_mul(2).min(ceiling);
                warn!(wait = %label, polls, error = %e, delay_ms = delay.as_millis() as u64, "Transient error while waiting");
            }
            Err(e) => return Err(e),
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(InterconnectError::Timeout {
                waited_for: label.to_string(),
                elapsed,
            });
        }

        let sleep_for = delay.min(policy.timeout - elapsed);
        tokio::select! {
            _ = cancel.cancelled() => return Err(InterconnectError::Cancelled),
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}
