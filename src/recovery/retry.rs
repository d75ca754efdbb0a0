/// Retry scheduling with exponential backoff and jitter
///
/// delay(attempt) = min(max, base * multiplier^(attempt - 1)), optionally
/// multiplied by a uniform factor in [0.5, 1.5] so that concurrent operations
/// failing together do not retry in lockstep.
use super::classification::ClassifiedError;
use super::context::OperationContext;
use crate::config::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Lower bound of the jitter factor
pub const JITTER_MIN: f64 = 0.5;

/// Upper bound of the jitter factor
pub const JITTER_MAX: f64 = 1.5;

/// Delay to wait after failed attempt number `attempt` (1-based)
///
/// `attempt` 0 is treated as 1. Overflowing or infinite intermediate values
/// clamp to `max`, negative or NaN ones to zero. Jitter may push the delay
/// past `max` but never past `Duration::MAX`.
pub fn next_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_enabled: bool,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let factor = multiplier.powi(exponent);
    let delay = saturating_secs(base.as_secs_f64() * factor, max);

    if jitter_enabled {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        saturating_secs(delay.as_secs_f64() * jitter, Duration::MAX)
    } else {
        delay
    }
}

fn saturating_secs(secs: f64, cap: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else if secs >= cap.as_secs_f64() {
        cap
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(cap)
    }
}

/// Retry decisions for one engine configuration
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempt cap for an operation (context override or policy default)
    pub fn max_attempts(&self, ctx: &OperationContext) -> u32 {
        ctx.max_attempts.unwrap_or(self.policy.max_attempts).max(1)
    }

    /// Delay before the attempt following failed attempt `attempt`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        next_delay(
            attempt,
            self.policy.base_delay,
            self.policy.max_delay,
            self.policy.backoff_multiplier,
            self.policy.jitter_enabled,
        )
    }

    /// Whether the original operation should be attempted again
    ///
    /// True iff the error is retryable, attempts remain, and the caller's
    /// predicate does not veto the retry.
    pub fn should_retry<P>(&self, ctx: &OperationContext, error: &ClassifiedError, veto: P) -> bool
    where
        P: FnOnce(&ClassifiedError, &OperationContext) -> bool,
    {
        error.retryable && ctx.attempt < self.max_attempts(ctx) && veto(error, ctx)
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::classification::{ErrorClassifier, ErrorKind};
    use crate::RegistryError;
    use proptest::prelude::*;

    fn formula(attempt: u32, base: Duration, max: Duration, multiplier: f64) -> Duration {
        let factor = multiplier.powi(attempt as i32 - 1);
        if base.as_secs_f64() * factor >= max.as_secs_f64() {
            max
        } else {
            base.mul_f64(factor)
        }
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        let delays: Vec<_> = (1..=7)
            .map(|attempt| next_delay(attempt, base, max, 2.0, false))
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(next_delay(0, base, max, 2.0, false), base);
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let max = Duration::from_secs(30);
        assert_eq!(
            next_delay(u32::MAX, Duration::from_secs(1), max, 2.0, false),
            max
        );
        assert_eq!(
            next_delay(10_000, Duration::from_secs(1), max, 10.0, false),
            max
        );
    }

    #[test]
    fn test_unbounded_max_does_not_overflow() {
        let delay = next_delay(1, Duration::MAX, Duration::MAX, 2.0, true);
        assert!(delay >= Duration::MAX.mul_f64(0.4));

        assert_eq!(
            next_delay(64, Duration::from_secs(1), Duration::MAX, 2.0, false),
            Duration::from_secs(1 << 63)
        );
        let delay = next_delay(u32::MAX, Duration::from_secs(1), Duration::MAX, 2.0, true);
        assert!(delay >= Duration::MAX.mul_f64(0.4));
    }

    #[test]
    fn test_negative_multiplier_clamps_to_zero() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(next_delay(2, base, max, -2.0, false), Duration::ZERO);
        assert_eq!(next_delay(2, base, max, -2.0, true), Duration::ZERO);
        // Even exponents are positive again
        assert_eq!(next_delay(3, base, max, -2.0, false), Duration::from_secs(4));
        assert_eq!(next_delay(2, base, max, f64::NAN, true), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds_over_many_samples() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(30);

        for i in 0..10_000u32 {
            let attempt = i % 12 + 1;
            let expected = formula(attempt, base, max, 2.0).as_secs_f64();
            let delay = next_delay(attempt, base, max, 2.0, true).as_secs_f64();

            assert!(
                delay >= expected * JITTER_MIN - 1e-9 && delay <= expected * JITTER_MAX + 1e-9,
                "attempt {} produced {}s outside [{}, {}]",
                attempt,
                delay,
                expected * JITTER_MIN,
                expected * JITTER_MAX
            );
        }
    }

    #[test]
    fn test_jitter_varies_delays() {
        let delays: Vec<_> = (0..20)
            .map(|_| next_delay(3, Duration::from_millis(100), Duration::from_secs(10), 2.0, true))
            .collect();
        let all_same = delays.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same, "Jitter should produce varied delays");
    }

    proptest! {
        #[test]
        fn prop_no_jitter_matches_formula(
            attempt in 1u32..40,
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);
            prop_assert_eq!(
                next_delay(attempt, base, max, multiplier, false),
                formula(attempt, base, max, multiplier)
            );
        }

        #[test]
        fn prop_no_jitter_never_exceeds_max(attempt in 1u32..200, base_ms in 1u64..10_000) {
            let max = Duration::from_secs(30);
            prop_assert!(next_delay(attempt, Duration::from_millis(base_ms), max, 2.0, false) <= max);
        }
    }

    #[test]
    fn test_should_retry_respects_cap() {
        let controller = RetryController::default();
        let error = ErrorClassifier::new().classify(&RegistryError::Timeout("slow".into()));
        let mut ctx = OperationContext::new("test");

        for attempt in 1..=2 {
            ctx.attempt = attempt;
            assert!(controller.should_retry(&ctx, &error, |_, _| true));
        }

        ctx.attempt = 3;
        assert!(!controller.should_retry(&ctx, &error, |_, _| true));
    }

    #[test]
    fn test_should_retry_honours_context_override() {
        let controller = RetryController::default();
        let error = ErrorClassifier::new().classify(&RegistryError::Network("down".into()));
        let mut ctx = OperationContext::new("test").with_max_attempts(5);

        ctx.attempt = 4;
        assert!(controller.should_retry(&ctx, &error, |_, _| true));
        ctx.attempt = 5;
        assert!(!controller.should_retry(&ctx, &error, |_, _| true));
    }

    #[test]
    fn test_should_retry_rejects_non_retryable() {
        let controller = RetryController::default();
        let error = ErrorClassifier::new().classify(&RegistryError::Other("mystery".into()));
        assert_eq!(error.kind, ErrorKind::Unknown);

        let mut ctx = OperationContext::new("test");
        ctx.attempt = 1;
        assert!(!controller.should_retry(&ctx, &error, |_, _| true));
    }

    #[test]
    fn test_should_retry_caller_veto() {
        let controller = RetryController::default();
        let error = ErrorClassifier::new().classify(&RegistryError::Network("flap".into()));
        let mut ctx = OperationContext::new("test").with_metadata("stale", "true");
        ctx.attempt = 1;

        let vetoed = controller.should_retry(&ctx, &error, |_, ctx| {
            ctx.metadata_value("stale") != Some("true")
        });
        assert!(!vetoed);
    }
}
