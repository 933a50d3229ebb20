//! Idle backoff for the polling loop.
//!
//! When a poll finds no eligible job the engine sleeps before polling
//! again. Consecutive empty polls double the delay, starting from the base
//! poll interval and capped at the ceiling. Any claimed job resets it.

use std::time::Duration;

/// Exponential idle delay between empty polls.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    base: Duration,
    max: Duration,
    consecutive_idle: u32,
}

impl IdleBackoff {
    /// `max` is raised to `base` if it is smaller.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            consecutive_idle: 0,
        }
    }

    /// Record an empty poll and return how long to sleep before the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = delay_for(self.base, self.max, self.consecutive_idle);
        self.consecutive_idle = self.consecutive_idle.saturating_add(1);
        delay
    }

    /// Work was found; the next idle period starts from the base again.
    pub fn reset(&mut self) {
        self.consecutive_idle = 0;
    }

    pub fn consecutive_idle(&self) -> u32 {
        self.consecutive_idle
    }
}

/// `base * 2^attempt`, clamped to `max`.
pub fn delay_for(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
