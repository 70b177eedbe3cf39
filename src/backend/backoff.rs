//! Retry delay policy for backend calls.
//!
//! [`BackoffConfig`] controls how failed backend calls are retried. The
//! default, [`BackoffConfig::fixed()`], retries any failure twice with a
//! constant one-second pause. [`BackoffConfig::standard()`] is an exponential
//! policy with jitter for shared cloud rate limits.

use std::time::Duration;

/// Retry policy for backend calls.
///
/// # Example
///
/// ```
/// use content_pipeline::backend::BackoffConfig;
/// use std::time::Duration;
///
/// let fixed = BackoffConfig::fixed();
/// assert_eq!(fixed.max_retries, 2);
/// assert_eq!(fixed.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry. `1.0` keeps it constant.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter strategy.
    pub jitter: JitterStrategy,

    /// Retry every error, not only the transient ones.
    pub retry_any_error: bool,

    /// HTTP status codes treated as transient when `retry_any_error` is off.
    pub retryable_statuses: Vec<u16>,

    /// Whether to wait for a provider's `Retry-After` instead of the computed delay.
    pub respect_retry_after: bool,
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Delay is exactly the calculated value.
    None,

    /// Random value in `[0, calculated_delay]`.
    Full,
}

impl BackoffConfig {
    /// Two retries, one second apart, on any error. The default.
    pub fn fixed() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1),
            jitter: JitterStrategy::None,
            retry_any_error: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: false,
        }
    }

    /// No retry at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::fixed()
        }
    }

    /// Cloud API settings: 3 retries on transient errors, 1s initial,
    /// 2x multiplier, 60s max, full jitter, respects Retry-After.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            retry_any_error: false,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// Set the retry bound.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set a constant delay between attempts.
    pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = delay;
        self.multiplier = 1.0;
        self
    }

    /// Calculate the delay before retry N (0-indexed).
    ///
    /// The base delay is `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
        };

        Duration::from_secs_f64(jittered)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::fixed()
    }
}
