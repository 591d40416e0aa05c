//! Timing helpers for the token monitor.
//!
//! The schedule functions are pure: randomness is passed in, so bounds can be
//! checked exactly. [`ExponentialBackoff`] and [`grace_period`] wrap them with
//! a thread-local RNG.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::time::Instant;

use super::config::duration_secs;

/// Bounded exponential retry schedule used when token renewal fails.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(deserialize_with = "duration_secs")]
    pub initial_interval: Duration,

    /// Growth factor between retries.
    pub multiplier: f64,

    /// Upper bound for a single (unrandomized) delay.
    #[serde(deserialize_with = "duration_secs")]
    pub max_interval: Duration,

    /// Each delay is spread uniformly over `interval * (1 ± factor)`.
    pub randomization_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_interval: Duration::from_secs(5 * 60),
            randomization_factor: 0.5,
        }
    }
}

/// Computes the delay before retry number `attempt` (starting at 0).
///
/// `jitter` is in `[-1, 1]` and selects a point in the randomization window.
/// Returns `None` once `elapsed` plus the delay would exceed `budget`; a zero
/// budget stops immediately.
#[must_use]
pub fn backoff_interval(
    policy: &BackoffPolicy,
    attempt: u32,
    elapsed: Duration,
    budget: Duration,
    jitter: f64,
) -> Option<Duration> {
    if budget.is_zero() {
        return None;
    }

    let initial = policy.initial_interval.as_secs_f64();
    let max = policy.max_interval.as_secs_f64();
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = (initial * policy.multiplier.max(1.0).powi(exponent)).min(max);

    let factor = policy.randomization_factor.clamp(0.0, 1.0);
    let randomized = base * factor.mul_add(jitter.clamp(-1.0, 1.0), 1.0);
    let delay = Duration::try_from_secs_f64(randomized.max(0.0)).unwrap_or(policy.max_interval);

    if elapsed.saturating_add(delay) > budget {
        None
    } else {
        Some(delay)
    }
}

/// Grace period for a token with `ttl`: 10% of the TTL plus up to another 10%.
///
/// `unit` is in `[0, 1)` and picks the jitter.
#[must_use]
pub fn grace_period_with(ttl: Duration, unit: f64) -> Duration {
    if ttl.is_zero() {
        return Duration::ZERO;
    }
    let jitter_max = ttl.mul_f64(0.1);
    jitter_max + jitter_max.mul_f64(unit.clamp(0.0, 1.0))
}

/// [`grace_period_with`] using a random jitter.
#[must_use]
pub fn grace_period(ttl: Duration) -> Duration {
    grace_period_with(ttl, rand::rng().random::<f64>())
}

/// How long to wait before acting on a token: two thirds of `ttl` plus one
/// third of `grace`.
#[must_use]
pub fn sleep_duration(ttl: Duration, grace: Duration) -> Duration {
    (ttl.saturating_mul(2) / 3).saturating_add(grace / 3)
}

/// Stateful backoff over a fixed time budget.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempt: u32,
    started: Instant,
    budget: Duration,
}

impl ExponentialBackoff {
    pub(crate) fn new(policy: BackoffPolicy, budget: Duration) -> Self {
        Self {
            policy,
            attempt: 0,
            started: Instant::now(),
            budget,
        }
    }

    /// Next delay, or `None` when the budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let jitter = rand::rng().random_range(-1.0..=1.0);
        let delay = backoff_interval(
            &self.policy,
            self.attempt,
            self.started.elapsed(),
            self.budget,
            jitter,
        )?;
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        let at = |n| backoff_interval(&policy, n, Duration::ZERO, HOUR, 0.0).unwrap();

        assert_eq!(at(0), Duration::from_secs(10));
        assert_eq!(at(1), Duration::from_secs(20));
        assert_eq!(at(2), Duration::from_secs(40));
        assert_eq!(at(5), Duration::from_secs(300));
        assert_eq!(at(12), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_randomization_window() {
        let policy = BackoffPolicy::default();
        let low = backoff_interval(&policy, 0, Duration::ZERO, HOUR, -1.0).unwrap();
        let high = backoff_interval(&policy, 0, Duration::ZERO, HOUR, 1.0).unwrap();
        assert_eq!(low, Duration::from_secs(5));
        assert_eq!(high, Duration::from_secs(15));
    }

    #[test]
    fn test_backoff_stops_at_budget() {
        let policy = BackoffPolicy::default();
        let budget = Duration::from_secs(30);

        assert!(backoff_interval(&policy, 0, Duration::from_secs(15), budget, 0.0).is_some());
        assert!(backoff_interval(&policy, 0, Duration::from_secs(25), budget, 0.0).is_none());
        assert!(backoff_interval(&policy, 0, Duration::ZERO, Duration::ZERO, 0.0).is_none());
    }

    #[test]
    fn test_grace_period_bounds() {
        let ttl = Duration::from_secs(10);
        assert_eq!(grace_period_with(ttl, 0.0), Duration::from_secs(1));
        assert_eq!(grace_period_with(ttl, 0.5), Duration::from_millis(1500));
        assert_eq!(grace_period_with(Duration::ZERO, 0.7), Duration::ZERO);
    }

    #[test]
    fn test_sleep_duration() {
        let ttl = Duration::from_secs(30);
        assert_eq!(
            sleep_duration(ttl, Duration::from_secs(3)),
            Duration::from_secs(21)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_exhausts() {
        let policy = BackoffPolicy {
            randomization_factor: 0.0,
            ..BackoffPolicy::default()
        };
        let mut backoff = ExponentialBackoff::new(policy, Duration::from_secs(60));

        let mut total = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            total += delay;
        }
        // 10 + 20 fit, 40 more would exceed 60
        assert_eq!(total, Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_backoff_within_randomized_cap(
            attempt in 0u32..64,
            jitter in -1.0f64..=1.0,
        ) {
            let policy = BackoffPolicy::default();
            let delay = backoff_interval(&policy, attempt, Duration::ZERO, HOUR, jitter).unwrap();
            prop_assert!(delay >= Duration::from_secs(5));
            prop_assert!(delay <= policy.max_interval.mul_f64(1.5));
        }

        #[test]
        fn prop_backoff_never_exceeds_budget(
            attempt in 0u32..16,
            elapsed_ms in 0u64..600_000,
            budget_ms in 0u64..600_000,
            jitter in -1.0f64..=1.0,
        ) {
            let policy = BackoffPolicy::default();
            let elapsed = Duration::from_millis(elapsed_ms);
            let budget = Duration::from_millis(budget_ms);
            if let Some(delay) = backoff_interval(&policy, attempt, elapsed, budget, jitter) {
                prop_assert!(elapsed + delay <= budget);
            }
        }

        #[test]
        fn prop_renewal_lands_before_expiry(ttl_ms in 1u64..86_400_000, unit in 0.0f64..1.0) {
            let ttl = Duration::from_millis(ttl_ms);
            let sleep = sleep_duration(ttl, grace_period_with(ttl, unit));
            prop_assert!(sleep < ttl);
            prop_assert!(sleep >= ttl.mul_f64(0.69));
        }
    }
}
