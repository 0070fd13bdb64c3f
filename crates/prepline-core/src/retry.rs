//! Retry with exponential backoff for API requests

use std::time::Duration;

use crate::error::StreamError;

/// Attempt budget and base delay for one request.
///
/// Passed explicitly to every API-calling component; there is no global
/// retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps (tests, dry runs)
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: base * 2^attempt (0.5s, 1s, 2s, ... by default)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Retry a fallible request with exponential backoff.
///
/// Retryable errors (see [`StreamError::is_retryable`]) are retried until
/// `max_attempts` is used up; the last error is then returned. Non-retryable
/// errors return immediately.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, StreamError>,
) -> Result<T, StreamError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < max_attempts && e.is_retryable() => {
                let delay = policy.backoff(attempt);
                attempt += 1;
                log::warn!("{label}: attempt {attempt}/{max_attempts} failed: {e}, retry in {delay:?}");
                std::thread::sleep(delay);
            }
            Err(e) => {
                log::debug!("{label}: giving up after {} attempt(s): {e}", attempt + 1);
                return Err(e);
            }
        }
    }
}
