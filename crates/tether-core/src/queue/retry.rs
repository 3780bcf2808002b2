//! Backoff policy: decides how long a failed item waits before it is eligible again.

use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// Growth is multiplicative on the item's current delay, so a stored item's
/// `backoff_delay` never decreases and never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Upper bound for any delay.
    pub max_delay: Duration,

    /// Growth factor applied after each further failure.
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay after one more failure: `min(current * multiplier, max_delay)`.
    ///
    /// A multiplier below 1.0 is treated as 1.0 so the delay cannot shrink.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let factor = self.multiplier.max(1.0);
        let grown_secs = current.as_secs_f64() * factor;
        if !grown_secs.is_finite() || grown_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay.max(current);
        }
        Duration::from_secs_f64(grown_secs).max(current)
    }

    /// Closed form of the delay in force after `failures` failures (1-indexed).
    ///
    /// Example with base=1s, multiplier=2.0, max=60s:
    /// - failure 1: 1s
    /// - failure 2: 2s
    /// - failure 3: 4s
    /// - failure 7: 60s (capped)
    pub fn delay_after(&self, failures: u32) -> Duration {
        let mut delay = self.base_delay.min(self.max_delay);
        for _ in 1..failures {
            let next = self.next_delay(delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(60_000), 2.0)
    }
}
