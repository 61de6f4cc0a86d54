//! # Backoff policy for Command redelivery and service restarts.
//!
//! The delay after the `n`-th failed attempt is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from the attempt number alone, so
//! jitter never feeds back into later delays.
//!
//! With the bus defaults (`first = 250ms`, `factor = 2.0`) this is the
//! `base * 2^attempts` schedule Commands are retried on.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use switchboard::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1))
//!     .with_jitter(JitterPolicy::None);
//!
//! assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
//! assert_eq!(backoff.delay_for(9), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for attempt `0`.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 250ms`, `factor = 2.0`, `max = 10s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(250),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Doubling backoff starting at `base`, capped at `max`, with equal jitter.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            first: base,
            max,
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }

    /// Same delay for every attempt (still capped at `max` if `first > max`).
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns the policy with a different jitter.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay to wait after attempt number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(first_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_millis(first_ms), Duration::from_millis(max_ms))
            .with_jitter(JitterPolicy::None)
    }

    #[test]
    fn test_doubles_per_attempt() {
        let p = exact(250, 10_000);
        assert_eq!(p.delay_for(0), Duration::from_millis(250));
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_capped_at_max() {
        let p = exact(250, 10_000);
        assert_eq!(p.delay_for(6), Duration::from_secs(10));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_first_above_max_is_clamped() {
        let p = exact(5_000, 1_000);
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_never_grows() {
        let p = BackoffPolicy::constant(Duration::from_millis(40));
        for attempt in 0..8 {
            assert_eq!(p.delay_for(attempt), Duration::from_millis(40));
        }
    }

    #[test]
    fn test_default_jitter_stays_between_half_and_base() {
        let p = BackoffPolicy::default();
        for attempt in 0..6 {
            let base = exact(250, 10_000).delay_for(attempt);
            let d = p.delay_for(attempt);
            assert!(d >= base / 2, "attempt {attempt}: {d:?} < half of {base:?}");
            assert!(d <= base, "attempt {attempt}: {d:?} > {base:?}");
        }
    }
}
