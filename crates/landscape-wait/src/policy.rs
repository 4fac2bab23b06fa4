//! How long and how often a wait polls.

use std::time::Duration;

/// Polling bounds for one [`wait`](crate::wait) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// `None` polls until success (or until `max_attempts` is spent).
    pub timeout: Option<Duration>,
    pub interval: Duration,
    /// Swallow supplier errors and poll again instead of failing at once.
    pub retry_on_error: bool,
    pub max_attempts: Option<u32>,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            interval,
            retry_on_error: false,
            max_attempts: None,
        }
    }

    /// A budget of `attempts` tries spaced `delay` apart. The timeout is
    /// `delay * attempts`, or none at all for a zero delay, so the budget
    /// ends the wait.
    pub fn attempts(attempts: u32, delay: Duration) -> Self {
        let attempts = attempts.max(1);
        Self {
            timeout: (!delay.is_zero()).then(|| delay.saturating_mul(attempts)),
            interval: delay,
            retry_on_error: false,
            max_attempts: Some(attempts),
        }
    }

    pub fn retry_on_error(mut self) -> Self {
        self.retry_on_error = true;
        self
    }

    /// Whether another attempt is allowed after `attempts` tries and `elapsed` time.
    pub(crate) fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.timeout.is_some_and(|t| elapsed >= t)
    }
}
