//! Sleep-and-retry on rate-limit responses.

use std::time::Duration;

use taxosync_core::{defaults, logging};
use taxosync_core::{Error, Result};
use tracing::{debug, warn};

/// Retry policy for rate-limited calls.
///
/// Only a 429 carrying the rate-limit error identifier is retried; every
/// other failure is returned to the caller on the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    /// Pause before each retry, in milliseconds.
    pub sleep_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RATE_LIMIT_RETRIES,
            sleep_ms: defaults::RATE_LIMIT_SLEEP_MS,
        }
    }
}

fn is_rate_limited(error: &Error) -> bool {
    error.api_failure().is_some_and(|f| f.is_rate_limited())
}

impl RateLimitPolicy {
    pub fn new(max_retries: u32, sleep_ms: u64) -> Self {
        Self {
            max_retries,
            sleep_ms,
        }
    }

    /// Execute an async operation, retrying while it is rate limited.
    ///
    /// Once the budget is spent the last rate-limit failure is returned as is,
    /// so the caller still sees the structured record.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            { logging::OPERATION } = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after rate-limit retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if is_rate_limited(&error) => {
                    if attempt >= self.max_retries {
                        warn!(
                            { logging::OPERATION } = operation_name,
                            attempts = attempt + 1,
                            error = %error,
                            "Rate-limit retries exhausted"
                        );
                        return Err(error);
                    }
                    attempt += 1;
                    warn!(
                        { logging::OPERATION } = operation_name,
                        attempt,
                        max_retries = self.max_retries,
                        sleep_ms = self.sleep_ms,
                        "Rate limited, sleeping before retry"
                    );
                    tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
