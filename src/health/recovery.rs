// Recovery strategy - bounded attempts with exponential settle time

use std::time::Duration;

/// Attempts left for one episode of a condition, and how long each attempt
/// gets before its outcome is judged
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl RecoveryStrategy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: base_delay.saturating_mul(8),
            current_attempt: 0,
        }
    }

    /// Settle time for the next attempt (base * 2^attempt), `None` when exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32 << self.current_attempt.min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        self.current_attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn should_retry(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for RecoveryStrategy {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(1000))
    }
}
