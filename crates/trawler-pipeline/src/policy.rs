//! Retry and catch policies for steps.

use std::time::Duration;

use crate::{PipelineError, Result};

/// How many times a step is attempted and how long to wait between attempts.
///
/// The wait after failed attempt `k` (1-indexed) is
/// `initial_interval * backoff_multiplier^(k-1)`. The first attempt always
/// runs immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Validated constructor.
    ///
    /// Requires `max_attempts >= 1`, `initial_interval_secs >= 0` and
    /// `backoff_multiplier >= 1`.
    pub fn new(max_attempts: u32, initial_interval_secs: f64, backoff_multiplier: f64) -> Result<Self> {
        if max_attempts == 0 {
            return Err(PipelineError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !initial_interval_secs.is_finite() || initial_interval_secs < 0.0 {
            return Err(PipelineError::InvalidPolicy(format!(
                "initial interval must be a non-negative number of seconds, got {initial_interval_secs}"
            )));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(PipelineError::InvalidPolicy(format!(
                "backoff multiplier must be at least 1, got {backoff_multiplier}"
            )));
        }
        Ok(Self {
            max_attempts,
            initial_interval: Duration::from_secs_f64(initial_interval_secs),
            backoff_multiplier,
        })
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Wait imposed before attempt `attempt` (1-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay_after(attempt - 1)
        }
    }

    /// Wait after failed attempt `attempt` (1-indexed) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 2 second initial interval, doubling.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Absorb a step's final failure into the state bag instead of failing the
/// execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchPolicy {
    error_key: String,
}

impl CatchPolicy {
    pub fn new(error_key: impl Into<String>) -> Self {
        Self {
            error_key: error_key.into(),
        }
    }

    /// Build from a JSON-path style result path such as `$.error`.
    pub fn from_path(path: &str) -> Self {
        let key = path.strip_prefix("$.").unwrap_or(path);
        Self::new(key)
    }

    /// State key the error message is written to.
    pub fn error_key(&self) -> &str {
        &self.error_key
    }
}

impl Default for CatchPolicy {
    fn default() -> Self {
        Self::from_path("$.error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.initial_interval(), Duration::from_secs(2));
        assert_eq!(policy.backoff_multiplier(), 2.0);
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::new(5, 1.5, 3.0).unwrap();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        for k in 1..=4u32 {
            let expected = 1.5 * 3f64.powi(k as i32 - 1);
            assert_eq!(policy.delay_after(k), Duration::from_secs_f64(expected));
            assert_eq!(policy.delay_before(k + 1), policy.delay_after(k));
        }
    }

    #[test]
    fn test_constant_interval_with_multiplier_one() {
        let policy = RetryPolicy::new(4, 0.25, 1.0).unwrap();
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(3), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_policies() {
        assert!(matches!(
            RetryPolicy::new(0, 1.0, 2.0),
            Err(PipelineError::InvalidPolicy(_))
        ));
        assert!(RetryPolicy::new(1, -1.0, 2.0).is_err());
        assert!(RetryPolicy::new(1, f64::NAN, 2.0).is_err());
        assert!(RetryPolicy::new(1, 1.0, 0.5).is_err());
        assert!(RetryPolicy::new(1, 0.0, 1.0).is_ok());
    }

    #[test]
    fn test_huge_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX, 1.0, 10.0).unwrap();
        assert_eq!(policy.delay_after(1000), Duration::MAX);
    }

    #[test]
    fn test_catch_policy_from_path() {
        assert_eq!(CatchPolicy::from_path("$.crawlError").error_key(), "crawlError");
        assert_eq!(CatchPolicy::from_path("plain").error_key(), "plain");
        assert_eq!(CatchPolicy::default().error_key(), "error");
    }
}
