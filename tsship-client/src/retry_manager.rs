use std::time::Duration;

use crate::errors::ShipperError;

/// Fixed-delay retry policy for batch sends.
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_retries: usize,
    delay: Duration,
}

impl RetryManager {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Extra attempts after the first one.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Only transport-level failures and unexplained 5xx answers are worth another attempt;
    /// a rejection stays a rejection.
    pub fn is_retryable(&self, error: &ShipperError) -> bool {
        error.is_transient()
    }

    /// True when attempt number `attempt` (0-based) may be followed by another.
    pub fn should_retry(&self, attempt: usize, error: &ShipperError) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }
}
