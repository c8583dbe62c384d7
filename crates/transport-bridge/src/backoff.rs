//! Reconnect backoff.

use std::time::Duration;

/// First delay used when none is configured.
pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
/// Delay cap used when none is configured.
pub const DEFAULT_MAX: Duration = Duration::from_secs(15);

/// Exponential reconnect delay: `base * 2^attempt`, capped at `max`.
///
/// Each failed attempt consumes the current delay and doubles the next one.
/// A successful connection calls [`Backoff::reset`].
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Zero values fall back to [`DEFAULT_BASE`] / [`DEFAULT_MAX`]. A cap
    /// below the base is raised to the base.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = if base.is_zero() { DEFAULT_BASE } else { base };
        let max = if max.is_zero() { DEFAULT_MAX } else { max };
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.peek();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Delay [`Backoff::next_delay`] would return, without advancing.
    pub fn peek(&self) -> Duration {
        let factor = 1u32 << self.attempt.min(31);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX)
    }
}
