//! Retry policy with exponential backoff and jitter.
//!
//! The delay before attempt `k` (for `k >= 2`) is
//! `min(base_delay * 2^(k-2), max_delay)` scaled by a uniform random factor
//! in `[0.5, 1.0]`. The factor is drawn through [`JitterSource`] so tests can
//! pin it and assert exact bounds.

use std::time::Duration;

use rand::Rng;

use crate::error::ClientError;

/// Retry behavior for a single request.
///
/// A disabled policy is simply `max_attempts == 1`; there is no separate
/// on/off switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    /// The standard opt-in policy: 3 attempts, 1 s base, 30 s cap.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidConfiguration`] when `max_attempts == 0`,
    /// `base_delay` is zero, or `max_delay < base_delay`.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, ClientError> {
        if max_attempts == 0 {
            return Err(ClientError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if base_delay.is_zero() {
            return Err(ClientError::InvalidConfiguration(
                "base_delay must be greater than zero".to_string(),
            ));
        }
        if max_delay < base_delay {
            return Err(ClientError::InvalidConfiguration(
                "max_delay must be at least base_delay".to_string(),
            ));
        }
        Ok(Self { max_attempts, base_delay, max_delay })
    }

    /// A policy that never retries (single attempt).
    #[must_use]
    pub fn disabled() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Maximum number of send attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay before the second attempt.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper clamp applied to the exponential delay before jitter.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Compute the wait before `attempt` (1-based, `attempt >= 2`), scaled by
    /// `factor`.
    ///
    /// `factor` is expected in `[0.5, 1.0]`; see [`JitterSource`].
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, factor: f64) -> Duration {
        // 2^(attempt - 2), capped so the shift cannot overflow.
        let exponent = attempt.saturating_sub(2).min(31);
        let unclamped = self.base_delay.saturating_mul(1u32 << exponent);
        let clamped = unclamped.min(self.max_delay);
        clamped.mul_f64(factor.clamp(0.0, 1.0))
    }
}

/// Source of the random backoff scaling factor.
///
/// Injected into the [`Session`](crate::session::Session) so tests can
/// substitute a fixed factor and assert deterministic delays.
pub trait JitterSource: Send + Sync {
    /// Return a factor in `[0.5, 1.0]` applied to the computed delay.
    fn factor(&self) -> f64;
}

/// Production jitter source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn factor(&self) -> f64 {
        rand::thread_rng().gen_range(0.5..=1.0)
    }
}
