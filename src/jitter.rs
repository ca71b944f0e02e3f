//! Jitter strategies to prevent thundering herd

use rand::Rng;
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Full jitter: random between 0 and delay
    Full,
    /// Equal jitter: random between delay/2 and delay
    Equal,
    /// Decorrelated jitter: AWS-style with state
    Decorrelated { base: Duration, max: Duration },
    /// Proportional jitter: `value <- (1 - amount * rand()) * value`, amount in `[0, 1]`.
    Proportional { amount: f64 },
}

impl Jitter {
    /// Create a full jitter strategy
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Create an equal jitter strategy
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Create a decorrelated jitter strategy
    pub fn decorrelated(base: Duration, max: Duration) -> Self {
        Jitter::Decorrelated { base, max }
    }

    /// Proportional jitter with the given amount, clamped to `[0, 1]`. Defaults to 0.5
    /// when constructed via [`Jitter::default_proportional`].
    pub fn proportional(amount: f64) -> Self {
        Jitter::Proportional { amount: amount.clamp(0.0, 1.0) }
    }

    /// Proportional jitter with the spec's default amount (0.5).
    pub fn default_proportional() -> Self {
        Jitter::Proportional { amount: 0.5 }
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let jittered = rand::thread_rng().gen_range(0..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                let jittered = rand::thread_rng().gen_range(half..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Decorrelated { base, max } => {
                // Decorrelated jitter: sleep = min(cap, random(base, sleep * 3))
                // For simplicity, we use the delay as previous sleep
                let base_millis = base.as_millis() as u64;
                let delay_millis = delay.as_millis() as u64;
                let max_millis = max.as_millis() as u64;

                let upper = delay_millis.saturating_mul(3);
                let range_max = upper.min(max_millis);

                if base_millis >= range_max {
                    return Duration::from_millis(base_millis);
                }

                let jittered = rand::thread_rng().gen_range(base_millis..=range_max);
                Duration::from_millis(jittered)
            }
            Jitter::Proportional { amount } => {
                let r: f64 = rand::thread_rng().gen_range(0.0..=1.0);
                scale_by_proportional_factor(delay, *amount, r)
            }
        }
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let jittered = rng.gen_range(0..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Equal => {
                let millis = delay.as_millis() as u64;
                if millis == 0 {
                    return Duration::from_millis(0);
                }
                let half = millis / 2;
                let jittered = rng.gen_range(half..=millis);
                Duration::from_millis(jittered)
            }
            Jitter::Decorrelated { base, max } => {
                let base_millis = base.as_millis() as u64;
                let delay_millis = delay.as_millis() as u64;
                let max_millis = max.as_millis() as u64;

                let upper = delay_millis.saturating_mul(3);
                let range_max = upper.min(max_millis);

                if base_millis >= range_max {
                    return Duration::from_millis(base_millis);
                }

                let jittered = rng.gen_range(base_millis..=range_max);
                Duration::from_millis(jittered)
            }
            Jitter::Proportional { amount } => {
                let r: f64 = rng.gen_range(0.0..=1.0);
                scale_by_proportional_factor(delay, *amount, r)
            }
        }
    }
}

/// `(1 - amount * r) * delay`, with `r` drawn from `[0, 1]`.
fn scale_by_proportional_factor(delay: Duration, amount: f64, r: f64) -> Duration {
    let factor = (1.0 - amount * r).max(0.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
