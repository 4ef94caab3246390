//! # Redelivery Retry Policy
//!
//! Decides what happens to a message whose handler failed with a transient
//! error: redeliver after a randomized delay, or dead-letter once the
//! attempts are used up. Attempt N (1-based delivery count) draws its delay
//! uniformly from the N-th configured range.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigResult, ConfigurationError, DelayRangeConfig, RetryConfig};
use crate::constants::defaults;

/// Inclusive delay range for one redelivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn from_secs(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min: Duration::from_secs(min_seconds),
            max: Duration::from_secs(max_seconds),
        }
    }

    /// Uniformly random duration in `[min, max]`, millisecond resolution
    pub fn sample(&self) -> Duration {
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.min;
        }
        Duration::from_millis(fastrand::u64(min_ms..=max_ms))
    }

    pub fn contains(&self, delay: Duration) -> bool {
        delay >= self.min && delay <= self.max
    }
}

/// Ranges plus the number of redeliveries they allow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicySpec {
    pub ranges: Vec<DelayRange>,
    pub max_attempts: u32,
}

impl RetryPolicySpec {
    /// `max_attempts` defaults to the number of ranges
    ///
    /// Without ranges there is nothing to delay by, so nothing is redelivered.
    pub fn new(ranges: Vec<DelayRange>, max_attempts: Option<u32>) -> Self {
        let max_attempts = if ranges.is_empty() {
            0
        } else {
            max_attempts.unwrap_or(ranges.len() as u32)
        };
        Self {
            ranges,
            max_attempts,
        }
    }

    /// Like [`RetryPolicySpec::new`], but redeliveries without ranges are an error
    pub fn try_new(
        field: &str,
        ranges: Vec<DelayRange>,
        max_attempts: Option<u32>,
    ) -> ConfigResult<Self> {
        match max_attempts {
            Some(attempts) if attempts > 0 && ranges.is_empty() => {
                Err(ConfigurationError::invalid_value(
                    field,
                    format!("max_attempts = {attempts}, ranges = []"),
                    "redelivery attempts need at least one delay range",
                ))
            }
            _ => Ok(Self::new(ranges, max_attempts)),
        }
    }

    fn range_for(&self, attempt: u32) -> Option<&DelayRange> {
        if attempt == 0 || self.ranges.is_empty() {
            return None;
        }
        let index = (attempt as usize - 1).min(self.ranges.len() - 1);
        self.ranges.get(index)
    }
}

impl Default for RetryPolicySpec {
    fn default() -> Self {
        Self::new(
            defaults::RETRY_RANGES_SECONDS
                .iter()
                .map(|&(min, max)| DelayRange::from_secs(min, max))
                .collect(),
            None,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the message visible again after this delay
    Redeliver(Duration),
    /// Move the message to the dead-letter store
    DeadLetter,
}

/// Per-message-type redelivery policy
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    default_spec: RetryPolicySpec,
    overrides: HashMap<String, RetryPolicySpec>,
}

impl RetryPolicy {
    pub fn new(default_spec: RetryPolicySpec) -> Self {
        Self {
            default_spec,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, message_type: impl Into<String>, spec: RetryPolicySpec) -> Self {
        self.overrides.insert(message_type.into(), spec);
        self
    }

    pub fn from_config(config: &RetryConfig) -> ConfigResult<Self> {
        let default_ranges = convert_ranges("retry.default_ranges", &config.default_ranges)?;
        let mut policy = Self::new(RetryPolicySpec::try_new(
            "retry.default_ranges",
            default_ranges,
            None,
        )?);

        for entry in &config.overrides {
            if entry.message_type.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "message_type",
                    "retry.overrides",
                ));
            }
            let field = format!("retry.overrides[{}].ranges", entry.message_type);
            let ranges = convert_ranges(&field, &entry.ranges)?;
            policy = policy.with_override(
                entry.message_type.clone(),
                RetryPolicySpec::try_new(&field, ranges, entry.max_attempts)?,
            );
        }
        Ok(policy)
    }

    pub fn spec_for(&self, message_type: &str) -> &RetryPolicySpec {
        self.overrides
            .get(message_type)
            .unwrap_or(&self.default_spec)
    }

    /// Delay before redelivering after failed attempt `attempt` (1-based)
    ///
    /// `None` once the policy is exhausted.
    pub fn next_delay(&self, message_type: &str, attempt: u32) -> Option<Duration> {
        let spec = self.spec_for(message_type);
        if attempt == 0 || attempt > spec.max_attempts {
            return None;
        }
        spec.range_for(attempt).map(DelayRange::sample)
    }

    /// True when attempt `attempt` has no redelivery left
    pub fn is_exhausted(&self, message_type: &str, attempt: u32) -> bool {
        attempt > self.spec_for(message_type).max_attempts
    }

    pub fn decide(&self, message_type: &str, attempt: u32) -> RetryDecision {
        match self.next_delay(message_type, attempt) {
            Some(delay) => {
                debug!(
                    message_type = %message_type,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling redelivery"
                );
                RetryDecision::Redeliver(delay)
            }
            None => RetryDecision::DeadLetter,
        }
    }
}

fn convert_ranges(field: &str, ranges: &[DelayRangeConfig]) -> ConfigResult<Vec<DelayRange>> {
    ranges
        .iter()
        .map(|r| {
            if r.min_seconds > r.max_seconds {
                Err(ConfigurationError::invalid_value(
                    field,
                    format!("{}..{}", r.min_seconds, r.max_seconds),
                    "min_seconds must not exceed max_seconds",
                ))
            } else {
                Ok(DelayRange::from_secs(r.min_seconds, r.max_seconds))
            }
        })
        .collect()
}
