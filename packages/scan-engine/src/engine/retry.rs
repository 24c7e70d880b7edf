//! Retry policy: a pure function from (attempts, failure kind) to a decision.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Collaborator timeout, rate limit, or invocation ceiling hit
    Transient,
    /// Bad input that will not get better by retrying
    Permanent,
    /// Anything unclassified; retried like a transient failure
    Unknown,
}

impl FailureKind {
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureKind::Permanent)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
            FailureKind::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Eligible again on the very next poll tick
    RetryImmediately,
    /// Eligible once the delay has elapsed
    RetryAfter(Duration),
    /// Terminal failure
    GiveUp,
}

/// Attempts at which the job is given up.
pub const MAX_ATTEMPTS: i32 = 6;

/// Decide what to do after the `attempts`-th failed attempt.
///
/// `attempts` is cumulative over the job's lifetime, including the failure
/// being decided on.
pub fn decide(attempts: i32, kind: FailureKind) -> RetryDecision {
    if kind.is_permanent() {
        return RetryDecision::GiveUp;
    }

    match attempts {
        i32::MIN..=2 => RetryDecision::RetryImmediately,
        3 => RetryDecision::RetryAfter(Duration::minutes(5)),
        4 => RetryDecision::RetryAfter(Duration::minutes(15)),
        5 => RetryDecision::RetryAfter(Duration::minutes(30)),
        _ => RetryDecision::GiveUp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn policy_table() {
        use FailureKind::Transient;
        assert_eq!(decide(1, Transient), RetryDecision::RetryImmediately);
        assert_eq!(decide(2, Transient), RetryDecision::RetryImmediately);
        assert_eq!(decide(3, Transient), RetryDecision::RetryAfter(Duration::minutes(5)));
        assert_eq!(decide(4, Transient), RetryDecision::RetryAfter(Duration::minutes(15)));
        assert_eq!(decide(5, Transient), RetryDecision::RetryAfter(Duration::minutes(30)));
        assert_eq!(decide(6, Transient), RetryDecision::GiveUp);
    }

    #[test]
    fn unknown_is_treated_as_transient() {
        for attempt in 0..10 {
            assert_eq!(
                decide(attempt, FailureKind::Unknown),
                decide(attempt, FailureKind::Transient)
            );
        }
    }

    proptest! {
        #[test]
        fn permanent_always_gives_up(attempt in any::<i32>()) {
            prop_assert_eq!(decide(attempt, FailureKind::Permanent), RetryDecision::GiveUp);
        }

        #[test]
        fn budget_is_exhausted_from_six_on(attempt in MAX_ATTEMPTS..1000) {
            prop_assert_eq!(decide(attempt, FailureKind::Transient), RetryDecision::GiveUp);
        }

        #[test]
        fn delays_never_shrink(attempt in 1..MAX_ATTEMPTS) {
            let delay = |d: RetryDecision| match d {
                RetryDecision::RetryImmediately => Duration::zero(),
                RetryDecision::RetryAfter(d) => d,
                RetryDecision::GiveUp => Duration::weeks(52),
            };
            prop_assert!(
                delay(decide(attempt, FailureKind::Transient))
                    <= delay(decide(attempt + 1, FailureKind::Transient))
            );
        }
    }
}
