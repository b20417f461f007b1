//! Exponential reconnect backoff.

use std::time::Duration;

/// Maximum number of reconnection attempts before the session fails.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Delay before the first reconnection attempt.
pub const RECONNECT_DELAY_FLOOR: Duration = Duration::from_secs(2);

/// Upper bound for the reconnect delay.
pub const RECONNECT_DELAY_CAP: Duration = Duration::from_secs(30);

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts.
    pub max_attempts: u32,

    /// Delay before the first attempt.
    pub floor: Duration,

    /// Maximum delay between attempts.
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            floor: RECONNECT_DELAY_FLOOR,
            cap: RECONNECT_DELAY_CAP,
        }
    }
}

impl ReconnectPolicy {
    /// Delay following `delay`: doubled, capped.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.cap)
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Reconnect bookkeeping for one session: attempt count and current delay.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    attempts: u32,
    delay: Duration,
}

impl ReconnectScheduler {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.floor;
        Self {
            policy,
            attempts: 0,
            delay,
        }
    }

    /// Registers a failure. Returns the attempt number and the delay to wait
    /// before it, or `None` once the attempt budget is spent.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if !self.policy.should_retry(self.attempts) {
            return None;
        }
        self.attempts += 1;
        let delay = self.delay;
        self.delay = self.policy.next_delay(delay);
        Some((self.attempts, delay))
    }

    /// Back to zero attempts and the floor delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.policy.floor;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next attempt would wait.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }
}
