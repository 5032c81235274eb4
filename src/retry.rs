//! Bounded retry-with-timeout used by every wait against the remote UI.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::driver::{DriverError, ElementHandle, Locator, UiDriver};

/// How often a polling wait re-checks the page.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Attempt budget for waits against the remote UI.
///
/// Global to a session; every wait consumes its own budget, there is no
/// shared counter across waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(deserialize_with = "crate::duration::deserialize_duration")]
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            per_attempt_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: DriverError },

    /// A non-retryable driver error; surfaced on the first occurrence.
    #[error(transparent)]
    Fatal(DriverError),
}

/// Run `op` up to `policy.max_attempts` times.
///
/// Retryable driver errors (missing element, timeout, stale reference) burn
/// an attempt; anything else propagates immediately. The operation itself is
/// expected to bound its own latency (see [`await_present`]) -- no backoff
/// is inserted between attempts beyond that.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut last: Option<DriverError> = None;

    for _ in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => last = Some(err),
            Err(err) => return Err(RetryError::Fatal(err)),
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last: last.unwrap_or_else(|| {
            DriverError::Transport("retry policy allowed no attempts".to_string())
        }),
    })
}

/// Poll the driver until `locator` resolves or `timeout` elapses.
///
/// One bounded wait; it does not retry across multiple timeouts.
pub async fn await_present(
    driver: &dyn UiDriver,
    locator: &Locator,
    timeout: Duration,
) -> Result<ElementHandle, DriverError> {
    let deadline = Instant::now() + timeout;

    loop {
        match driver.locate(locator).await {
            Ok(handle) => return Ok(handle),
            Err(err) if err.is_retryable() => {}
            Err(err) => return Err(err),
        }

        if Instant::now() >= deadline {
            return Err(DriverError::Timeout {
                what: locator.to_string(),
                timeout,
            });
        }

        tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
    }
}

/// The composed wait every component uses: up to `max_attempts` bounded
/// polling waits for `locator`.
pub async fn wait_for(
    driver: &dyn UiDriver,
    locator: &Locator,
    policy: &RetryPolicy,
) -> Result<ElementHandle, RetryError> {
    with_retries(policy, || {
        await_present(driver, locator, policy.per_attempt_timeout)
    })
    .await
}
