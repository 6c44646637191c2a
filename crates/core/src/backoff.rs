//! Capped exponential backoff for socket reconnection.
//!
//! [`ReconnectPolicy`] tracks how many reconnect attempts have been spent
//! since the last successful open. The delay before attempt `n` (zero
//! based) is `min(base_delay * 2^n, max_delay)`. Once `max_attempts` have
//! been spent, [`ReconnectPolicy::next_delay`] returns `None` and the
//! caller must give up.

use std::time::Duration;

/// Tunable parameters plus the running attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Attempts allowed before the connection is declared closed.
    pub max_attempts: u32,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before reconnect attempt `attempt` (zero based).
    ///
    /// The result is clamped to [`ReconnectPolicy::max_delay`], including
    /// when `base_delay * 2^attempt` would overflow.
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Reserve the next attempt and return its delay, or `None` when the
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Number of attempts spent since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
