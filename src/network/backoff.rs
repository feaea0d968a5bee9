//! Reconnect backoff

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let base = Duration::from_millis(config.initial_delay_ms);
        Self {
            max: Duration::from_millis(config.max_delay_ms).max(base),
            current: base,
        }
    }

    /// Delay before the next attempt; doubles up to the configured maximum
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }

    /// `next_delay` with up to 20% random jitter added, so wrappers that lost
    /// the manager together do not reconnect in lockstep
    pub fn next_delay_jittered(&mut self) -> Duration {
        let delay = self.next_delay();
        let spread = delay.as_millis() as u64 / 5;
        if spread == 0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        delay + Duration::from_millis(rng.gen_range(0..=spread))
    }
}
