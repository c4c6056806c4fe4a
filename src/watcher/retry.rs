//! Poll pacing after failed cycles and error classification.
//!
//! The loop never gives up: the policy only decides how long to wait before
//! the next attempt.

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error classification, used for log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - bad key, missing table or bucket
    Client,
    /// Server errors (500-599) - temporary backend trouble
    Server,
    /// Network errors - connection issues, timeouts
    Network,
    /// Payload could not be decoded
    Decode,
}

/// How long the loop waits before the next cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Always wait exactly the poll interval
    #[default]
    Fixed,
    /// After `n` consecutive failed cycles wait `base^n` seconds, never less
    /// than the poll interval and never more than `max_secs`
    ExponentialBackoff {
        #[serde(rename = "baseSecs")]
        base_secs: u64,
        #[serde(rename = "maxSecs")]
        max_secs: u64,
    },
}

impl RetryPolicy {
    pub fn exponential(base_secs: u64, max_secs: u64) -> Self {
        RetryPolicy::ExponentialBackoff {
            base_secs,
            max_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            RetryPolicy::Fixed => Ok(()),
            RetryPolicy::ExponentialBackoff {
                base_secs,
                max_secs,
            } => {
                if base_secs < 2 {
                    return Err(WatchError::Config(format!(
                        "backoff base must be at least 2 seconds, got {}",
                        base_secs
                    )));
                }
                if max_secs < base_secs {
                    return Err(WatchError::Config(format!(
                        "backoff cap ({}s) is below its base ({}s)",
                        max_secs, base_secs
                    )));
                }
                Ok(())
            }
        }
    }

    /// Delay before the next cycle given the number of consecutive failures
    pub fn next_delay(&self, interval: Duration, consecutive_failures: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed => interval,
            RetryPolicy::ExponentialBackoff {
                base_secs,
                max_secs,
            } => {
                if consecutive_failures == 0 {
                    return interval;
                }
                let backoff = Duration::from_secs(base_secs.saturating_pow(consecutive_failures));
                interval.max(backoff.min(Duration::from_secs(max_secs)))
            }
        }
    }
}

/// Classify an error into an ErrorType
pub fn classify_error(error: &WatchError) -> ErrorType {
    match error {
        WatchError::Decode(_) => ErrorType::Decode,
        _ => match error.status() {
            Some(status) if (400..500).contains(&status) => ErrorType::Client,
            Some(status) if status >= 500 => ErrorType::Server,
            _ => ErrorType::Network,
        },
    }
}
