//! Retry policy: decides whether and when a failed task runs again.

use std::time::Duration;

use crate::domain::ErrorKind;

/// Retry policy for one task type.
///
/// `multiplier = 1.0` gives a fixed backoff; anything larger grows exponentially.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first one.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

/// What the queue does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    MarkDead,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// Calculate delay for the next retry based on attempt number.
    ///
    /// `attempts` is the number of attempts already made (1-indexed):
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// Retry while attempts remain and the error is worth retrying.
    pub fn decide(&self, attempts: u32, kind: ErrorKind) -> Decision {
        if !kind.is_retryable() || attempts >= self.max_attempts {
            Decision::MarkDead
        } else {
            Decision::Retry {
                delay: self.next_delay(attempts),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_secs(2), 2.0)
    }
}
