//! Backoff policies for retry and hedging middlewares.
//!
//! Each variant is a pure function of `(attempt, error)`; none perform I/O or
//! sleep themselves, matching the policy-pure-function design used throughout
//! the circuit breaker policies.

use std::sync::Arc;
use std::time::Duration;

/// Backoff strategy for retries and hedged fallbacks.
#[derive(Clone)]
pub enum Backoff<E = ()> {
    /// Fixed delay between retries.
    Constant { delay: Duration },
    /// `min + slope * attempt`, clamped to `[min, max]`.
    Linear { min: Duration, max: Duration, slope: Duration },
    /// `min(max, min * multiplier^attempt)`.
    Exponential { min: Duration, max: Duration, multiplier: f64 },
    /// `min(max, min * attempt^degree)`.
    Polynomial { min: Duration, max: Duration, degree: f64 },
    /// Per-invocation settings computed by a closure inspecting the error.
    Dynamic(Arc<dyn Fn(usize, Option<&E>) -> Duration + Send + Sync>),
}

impl<E> std::fmt::Debug for Backoff<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Self::Linear { min, max, slope } => f
                .debug_struct("Linear")
                .field("min", min)
                .field("max", max)
                .field("slope", slope)
                .finish(),
            Self::Exponential { min, max, multiplier } => f
                .debug_struct("Exponential")
                .field("min", min)
                .field("max", max)
                .field("multiplier", multiplier)
                .finish(),
            Self::Polynomial { min, max, degree } => f
                .debug_struct("Polynomial")
                .field("min", min)
                .field("max", max)
                .field("degree", degree)
                .finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(<closure>)"),
        }
    }
}

impl<E> Backoff<E> {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(min: Duration, max: Duration, slope: Duration) -> Self {
        Backoff::Linear { min, max, slope }
    }

    pub fn exponential(min: Duration, max: Duration) -> Self {
        Backoff::Exponential { min, max, multiplier: 2.0 }
    }

    pub fn exponential_with_multiplier(min: Duration, max: Duration, multiplier: f64) -> Self {
        Backoff::Exponential { min, max, multiplier }
    }

    pub fn polynomial(min: Duration, max: Duration, degree: f64) -> Self {
        Backoff::Polynomial { min, max, degree }
    }

    /// A backoff whose parameters are computed per invocation from the error.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(usize, Option<&E>) -> Duration + Send + Sync + 'static,
    {
        Backoff::Dynamic(Arc::new(f))
    }

    /// Calculate the delay for a given attempt number (1-indexed) and the error
    /// that triggered the retry, if any.
    pub fn delay(&self, attempt: usize, error: Option<&E>) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { min, max, slope } => {
                let extra = slope.checked_mul(attempt as u32).unwrap_or(*max);
                min.checked_add(extra).unwrap_or(*max).clamp(*min, *max)
            }
            Backoff::Exponential { min, max, multiplier } => {
                let scaled = min.as_secs_f64() * multiplier.powi(attempt as i32);
                duration_from_secs_f64_saturating(scaled).clamp(*min, *max)
            }
            Backoff::Polynomial { min, max, degree } => {
                let scaled = min.as_secs_f64() * (attempt.max(1) as f64).powf(*degree);
                duration_from_secs_f64_saturating(scaled).clamp(*min, *max)
            }
            Backoff::Dynamic(f) => f(attempt, error),
        }
    }
}

fn duration_from_secs_f64_saturating(secs: f64) -> Duration {
    if !secs.is_finite() || secs < 0.0 {
        return Duration::ZERO;
    }
    if secs > Duration::MAX.as_secs_f64() {
        return Duration::MAX;
    }
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff: Backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(1, None), Duration::from_secs(1));
        assert_eq!(backoff.delay(100, None), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_respects_slope_and_clamp() {
        let backoff: Backoff = Backoff::linear(
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::from_millis(100),
        );
        assert_eq!(backoff.delay(0, None), Duration::from_millis(100));
        assert_eq!(backoff.delay(1, None), Duration::from_millis(200));
        assert_eq!(backoff.delay(2, None), Duration::from_millis(300));
        assert_eq!(backoff.delay(10, None), Duration::from_millis(500), "clamped to max");
    }

    #[test]
    fn exponential_backoff_doubles_by_default() {
        let backoff: Backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(backoff.delay(0, None), Duration::from_millis(100));
        assert_eq!(backoff.delay(1, None), Duration::from_millis(200));
        assert_eq!(backoff.delay(2, None), Duration::from_millis(400));
        assert_eq!(backoff.delay(3, None), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff: Backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(10, None), Duration::from_secs(1));
    }

    #[test]
    fn polynomial_backoff_grows_by_degree() {
        let backoff: Backoff =
            Backoff::polynomial(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.delay(1, None), Duration::from_millis(100));
        assert_eq!(backoff.delay(2, None), Duration::from_millis(400));
        assert_eq!(backoff.delay(3, None), Duration::from_millis(900));
    }

    #[test]
    fn dynamic_backoff_inspects_error() {
        let backoff: Backoff<&'static str> = Backoff::dynamic(|attempt, err| {
            if err == Some(&"slow_down") {
                Duration::from_secs(5)
            } else {
                Duration::from_millis(attempt as u64 * 10)
            }
        });
        assert_eq!(backoff.delay(3, Some(&"slow_down")), Duration::from_secs(5));
        assert_eq!(backoff.delay(3, Some(&"other")), Duration::from_millis(30));
    }

    #[test]
    fn exponential_backoff_handles_overflow_without_panicking() {
        let backoff: Backoff =
            Backoff::exponential(Duration::from_secs(1), Duration::from_secs(3600));
        let delay = backoff.delay(1000, None);
        assert_eq!(delay, Duration::from_secs(3600));
    }
}
