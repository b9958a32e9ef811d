//! Reconnection delay policies.

use std::time::Duration;

/// Computes the wait before a reconnection attempt.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before the next attempt, given how many attempts were already
    /// made since the connection was lost.
    fn delay(&self, attempts_made: u32, base: Duration) -> Duration;
}

/// `base * 2^attempts_made`, optionally capped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoff {
    pub max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    /// Never wait longer than `max_delay`.
    pub fn capped(max_delay: Duration) -> Self {
        Self {
            max_delay: Some(max_delay),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempts_made: u32, base: Duration) -> Duration {
        let factor = 1_u32.checked_shl(attempts_made).unwrap_or(u32::MAX);
        let delay = base.saturating_mul(factor);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
