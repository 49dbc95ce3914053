//! How long the duplex engine waits between connection attempts.
//!
//! [`ReconnectBackoff`] is the policy read from `[client.reconnect]`; each
//! supervisor run steps through its own [`Schedule`], which is reset
//! whenever a socket actually opens.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::time::Duration;

use sy_domain::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Failed attempts in a row before the engine enters `Failed`.
    /// `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Un-jittered delay after `failures` failed attempts, capped at
    /// `max_delay`.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let grown = self.initial_delay.as_secs_f64()
            * self.backoff_factor.max(1.0).powi(failures.min(64) as i32);
        Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()))
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            policy: self.clone(),
            failures: 0,
            jitter: RandomState::new(),
        }
    }
}

/// One client's walk through a [`ReconnectBackoff`].
#[derive(Debug)]
pub struct Schedule {
    policy: ReconnectBackoff,
    failures: u32,
    jitter: RandomState,
}

impl Schedule {
    /// Record a failed attempt and return the wait before the next one,
    /// or `None` once `max_attempts` failures have piled up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let limit = self.policy.max_attempts;
        if limit > 0 && self.failures >= limit {
            return None;
        }
        let base = self.policy.base_delay(self.failures);
        self.failures += 1;

        // Up to 25% extra, drawn per client so a fleet dropped by one
        // server restart does not come back in lockstep.
        let fraction = self.jitter.hash_one(self.failures) as f64 / u64::MAX as f64;
        Some(base.mul_f64(1.0 + 0.25 * fraction))
    }

    /// The socket opened; start over from `initial_delay`.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
