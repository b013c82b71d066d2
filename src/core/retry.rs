//! Retry policy for transient fetch failures.
//!
//! Retry behavior is a first-class value object passed into the sync
//! orchestrator: max attempts, exponential backoff with jitter, and a
//! retryable-error predicate. A provider rate-limit response is handled
//! separately (wait until the provider's reset time, not a blind backoff).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RookeryError};

/// Default maximum fetch attempts (initial call + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff delay.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Default backoff ceiling.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default backoff multiplier.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default jitter fraction (applied as +/- on each delay).
pub const DEFAULT_JITTER: f64 = 0.2;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`; each delay is scaled by a random factor
    /// in `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt).
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with custom attempt count.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Policy with custom initial delay.
    #[must_use]
    pub const fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Validate the policy configuration.
    ///
    /// # Errors
    /// Returns an error if attempts are zero, the multiplier is below 1, or
    /// the jitter fraction falls outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RookeryError::Config(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(RookeryError::Config(
                "retry multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(RookeryError::Config(
                "retry jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether an error should be retried, given how many attempts have
    /// already been made.
    #[must_use]
    pub fn should_retry(&self, error: &RookeryError, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts && error.is_retryable()
    }

    /// Backoff delay before retry number `retry` (0-based: the delay after
    /// the first failed attempt is `delay_for(0)`).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let scaled = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
            capped * factor
        } else {
            capped
        };
        Duration::from_millis(scaled.max(0.0) as u64)
    }
}
