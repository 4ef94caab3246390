//! # Resilience
//!
//! Redelivery policy for handlers that fail transiently.

pub mod retry_policy;

pub use retry_policy::{DelayRange, RetryDecision, RetryPolicy, RetryPolicySpec};
