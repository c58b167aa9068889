// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

#[test]
fn doubles_until_the_cap() {
    let policy = BackoffPolicy {
        base: Duration::from_secs(1),
        cap: Duration::from_secs(60),
        jitter: 0.0,
    };
    assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_secs(1));
    assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_secs(2));
    assert_eq!(policy.delay_with_jitter(2, 0.0), Duration::from_secs(4));
    assert_eq!(policy.delay_with_jitter(5, 0.0), Duration::from_secs(32));
    // Capped from attempt 6 onward.
    assert_eq!(policy.delay_with_jitter(6, 0.0), Duration::from_secs(60));
    assert_eq!(policy.delay_with_jitter(30, 0.0), Duration::from_secs(60));
}

#[test]
fn jitter_spreads_around_the_exponential() {
    let policy = BackoffPolicy {
        base: Duration::from_secs(10),
        cap: Duration::from_secs(60),
        jitter: 0.2,
    };
    assert_eq!(policy.delay_with_jitter(0, 0.2), Duration::from_secs(12));
    assert_eq!(policy.delay_with_jitter(0, -0.2), Duration::from_secs(8));
}

#[test]
fn zero_jitter_policy_is_deterministic() {
    let policy = BackoffPolicy {
        base: Duration::from_millis(500),
        cap: Duration::from_secs(60),
        jitter: 0.0,
    };
    assert_eq!(policy.delay(3), Duration::from_secs(4));
}

#[test]
fn huge_attempt_numbers_do_not_overflow() {
    let policy = BackoffPolicy::default();
    assert_eq!(policy.delay_with_jitter(u32::MAX, 0.0), policy.cap);
}

proptest! {
    #[test]
    fn delay_stays_within_jittered_bounds(attempt in 0u32..64) {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(attempt);
        let upper = policy.cap.mul_f64(1.0 + policy.jitter);
        prop_assert!(delay <= upper, "delay {delay:?} above cap+jitter {upper:?}");
        // The first retry can never be slower than the jittered cap nor
        // faster than the jittered base.
        let lower = policy.base.mul_f64(1.0 - policy.jitter);
        if attempt == 0 {
            prop_assert!(delay >= lower.mul_f64(0.99));
        }
    }
}
