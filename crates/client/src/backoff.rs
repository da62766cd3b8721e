//! Reconnect delay policy

use std::time::Duration;

use rand::Rng;

/// Growth factor applied per failed attempt
const BACKOFF_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect, before jitter
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to every wait
    pub max_jitter: Duration,
    /// Reconnect attempts allowed after the last successful open
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 1.5^attempt + jitter, max_delay)`
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.base_delay.as_secs_f64() * BACKOFF_FACTOR.powi(exponent);
        let total = grown + jitter.as_secs_f64();

        if !total.is_finite() || total >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(total)
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.max_jitter)
        };
        self.delay_with_jitter(attempt, jitter)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
