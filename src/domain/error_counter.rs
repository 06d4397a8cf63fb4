//! Consecutive-failure counter and the backoff it drives.

use std::time::Duration;

/// Upper bound of the counter.
pub const MAX_ERRORS: u8 = 8;

/// Counts at or below this value restart the cycle immediately.
pub const BACKOFF_THRESHOLD: u8 = 2;

/// Bounded count (`0..=8`) of consecutive empty, failed or timed-out polls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCounter(u8);

impl ErrorCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Current count.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Resets the count after a non-empty reply.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Records one more failure, saturating at [`MAX_ERRORS`].
    pub fn record_failure(&mut self) {
        if self.0 < MAX_ERRORS {
            self.0 += 1;
        }
    }

    /// Delay before the next cycle.
    ///
    /// `None` (start immediately) while the count is at or below
    /// [`BACKOFF_THRESHOLD`]; `base << (count - 3)` above it.
    #[must_use]
    pub fn backoff(self, base: Duration) -> Option<Duration> {
        if self.0 <= BACKOFF_THRESHOLD {
            return None;
        }
        let shift = u32::from(self.0 - (BACKOFF_THRESHOLD + 1));
        Some(base.saturating_mul(1u32 << shift))
    }
}
