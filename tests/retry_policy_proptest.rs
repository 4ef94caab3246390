//! Property tests for redelivery delays.

use std::time::Duration;

use proptest::prelude::*;

use docflow_core::config::{DelayRangeConfig, RetryConfig, RetryOverrideConfig};
use docflow_core::resilience::{DelayRange, RetryDecision, RetryPolicy, RetryPolicySpec};

fn delay_range() -> impl Strategy<Value = DelayRange> {
    (0u64..5_000, 0u64..5_000).prop_map(|(a, b)| DelayRange {
        min: Duration::from_millis(a.min(b)),
        max: Duration::from_millis(a.max(b)),
    })
}

proptest! {
    #[test]
    fn sample_stays_inside_range(range in delay_range()) {
        for _ in 0..16 {
            prop_assert!(range.contains(range.sample()));
        }
    }

    #[test]
    fn attempt_draws_from_its_range(
        ranges in prop::collection::vec(delay_range(), 1..5),
        extra_attempts in 0u32..4,
    ) {
        let max_attempts = ranges.len() as u32 + extra_attempts;
        let policy = RetryPolicy::new(RetryPolicySpec::new(ranges.clone(), Some(max_attempts)));

        for attempt in 1..=max_attempts {
            let expected = ranges[(attempt as usize - 1).min(ranges.len() - 1)];
            match policy.decide("ValidationStepCompleted", attempt) {
                RetryDecision::Redeliver(delay) => prop_assert!(expected.contains(delay)),
                RetryDecision::DeadLetter => prop_assert!(false, "attempt {} dead-lettered early", attempt),
            }
        }
        prop_assert_eq!(
            policy.decide("ValidationStepCompleted", max_attempts + 1),
            RetryDecision::DeadLetter
        );
        prop_assert!(policy.is_exhausted("ValidationStepCompleted", max_attempts + 1));
    }

    #[test]
    fn overrides_apply_to_their_message_type_only(
        default_max in 1u32..4,
        override_max in 1u32..4,
    ) {
        let config = RetryConfig {
            default_ranges: (0..default_max)
                .map(|_| DelayRangeConfig { min_seconds: 1, max_seconds: 2 })
                .collect(),
            overrides: vec![RetryOverrideConfig {
                message_type: "GenerateReportContent".to_string(),
                ranges: vec![DelayRangeConfig { min_seconds: 60, max_seconds: 120 }],
                max_attempts: Some(override_max),
            }],
        };
        let policy = RetryPolicy::from_config(&config).unwrap();

        prop_assert_eq!(policy.spec_for("GenerateReportContent").max_attempts, override_max);
        prop_assert_eq!(policy.spec_for("ContentNodeGenerated").max_attempts, default_max);
        if let Some(delay) = policy.next_delay("GenerateReportContent", override_max) {
            prop_assert!(delay >= Duration::from_secs(60));
        } else {
            prop_assert!(false, "override exhausted too early");
        }
        prop_assert!(policy.is_exhausted("ContentNodeGenerated", default_max + 1));
    }
}

#[test]
fn test_default_policy_matches_documented_ranges() {
    let policy = RetryPolicy::default();
    let spec = policy.spec_for("StartValidationPipeline");
    assert_eq!(
        spec.ranges,
        vec![
            DelayRange::from_secs(3, 9),
            DelayRange::from_secs(10, 30),
            DelayRange::from_secs(30, 60),
        ]
    );
    assert_eq!(spec.max_attempts, 3);
    assert_eq!(policy.decide("StartValidationPipeline", 4), RetryDecision::DeadLetter);
}
