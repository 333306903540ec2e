//! Backoff utilities.
//!
//! Two independent mechanisms share the arithmetic here but stay separately
//! configured: the queue's per-job retry delay and the drainer's inter-cycle
//! delay. They are never composed.

use std::time::Duration;

/// Cap on the exponent to keep the doubling from overflowing.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Exponential backoff delay with jitter.
///
/// delay = min(base * 2^attempt + jitter, cap), with jitter up to 25% of the
/// exponential term. `attempt` is zero-based: attempt 0 yields roughly the
/// base delay.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exponential = base_ms.saturating_mul(1 << attempt.min(MAX_BACKOFF_SHIFT));

    // Add jitter (up to 25% of the delay)
    let jitter = rand::random::<u64>() % (exponential / 4 + 1);

    let capped = exponential
        .saturating_add(jitter)
        .min(cap.as_millis() as u64);

    Duration::from_millis(capped)
}

/// Delay governor for the drainer's poll loop.
///
/// Consecutive failed cycles double the delay before the next attempt, up to
/// a ceiling; an error-free cycle resets it to the base interval.
#[derive(Debug, Clone)]
pub struct CycleBackoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
    consecutive_failures: u32,
}

impl CycleBackoff {
    /// Create a governor starting at the base interval.
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            current: base,
            consecutive_failures: 0,
        }
    }

    /// The delay to sleep before the next cycle.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of failed cycles since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record an error-free cycle, resetting the delay to the base interval.
    pub fn record_success(&mut self) {
        self.current = self.base;
        self.consecutive_failures = 0;
    }

    /// Record a failed cycle, doubling the delay up to the ceiling.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
    }
}
