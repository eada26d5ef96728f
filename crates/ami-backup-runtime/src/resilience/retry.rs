//! Bounded retry with exponential backoff.
//!
//! Only idempotent calls go through here. Tagging qualifies: reapplying a
//! tag-set leaves the resource in the same state.

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_human;

/// How many times to attempt a call and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retry
    pub attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_human")]
    pub min_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_human")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Default::default()
        }
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(1) as usize
    }

    pub(crate) fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay.max(self.min_delay))
            .with_max_times(self.retries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.retries(), 2);
    }

    #[test]
    fn test_zero_attempts_means_no_retry() {
        let policy = RetryPolicy {
            attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.retries(), 0);
        assert_eq!(RetryPolicy::none().retries(), 0);
    }

    #[test]
    fn test_deserialize_human_durations() {
        let policy: RetryPolicy =
            serde_yaml::from_str("attempts: 5\nmin_delay: 500ms\nmax_delay: 30s\n").unwrap();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }
}
