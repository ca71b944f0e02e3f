//! Built-in circuit breaker policies.

use super::CircuitBreakerPolicyKind;
use std::collections::VecDeque;
use std::time::Duration;

/// Whether the latest failure tracking should trip the breaker open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    StayClosed,
    TripOpen,
}

/// Trips after `threshold` consecutive failures; any success resets the count.
/// Closes again from half-open only after `success_threshold` consecutive
/// probe successes; any probe failure re-opens immediately.
///
/// Grounded in the teacher's atomics-based single breaker (`on_success`/
/// `on_failure` resetting `failure_count` on success, comparing against
/// `failure_threshold` on failure).
#[derive(Debug, Clone, Copy)]
pub struct ConsecutivePolicy {
    pub threshold: usize,
    pub success_threshold: usize,
    pub recovery_timeout: Duration,
}

impl CircuitBreakerPolicyKind for ConsecutivePolicy {
    type Metrics = usize;

    fn initial_metrics(&self) -> Self::Metrics {
        0
    }

    fn when_closed(&self, metrics: &Self::Metrics) -> PolicyOutcome {
        if *metrics >= self.threshold {
            PolicyOutcome::TripOpen
        } else {
            PolicyOutcome::StayClosed
        }
    }

    fn when_half_opened(&self, elapsed_since_open: Duration) -> bool {
        elapsed_since_open >= self.recovery_timeout
    }

    fn track_success(&self, _metrics: &Self::Metrics) -> Self::Metrics {
        0
    }

    fn track_failure(&self, metrics: &Self::Metrics) -> Self::Metrics {
        metrics + 1
    }

    fn half_open_success_threshold(&self) -> usize {
        self.success_threshold.max(1)
    }
}

/// Trips when `failures / (failures + successes) >= failure_rate` inside a
/// fixed-size window of the last `window_size` outcomes.
#[derive(Debug, Clone)]
pub struct CountSlidingWindowPolicy {
    pub window_size: usize,
    pub minimum_calls: usize,
    pub failure_rate: f64,
    pub recovery_timeout: Duration,
}

/// `true` entries are failures, `false` are successes; oldest drops off the front.
#[derive(Debug, Clone, Default)]
pub struct WindowMetrics(VecDeque<bool>);

impl CircuitBreakerPolicyKind for CountSlidingWindowPolicy {
    type Metrics = WindowMetrics;

    fn initial_metrics(&self) -> Self::Metrics {
        WindowMetrics(VecDeque::with_capacity(self.window_size))
    }

    fn when_closed(&self, metrics: &Self::Metrics) -> PolicyOutcome {
        if metrics.0.len() < self.minimum_calls {
            return PolicyOutcome::StayClosed;
        }
        let failures = metrics.0.iter().filter(|b| **b).count();
        let rate = failures as f64 / metrics.0.len() as f64;
        if rate >= self.failure_rate {
            PolicyOutcome::TripOpen
        } else {
            PolicyOutcome::StayClosed
        }
    }

    fn when_half_opened(&self, elapsed_since_open: Duration) -> bool {
        elapsed_since_open >= self.recovery_timeout
    }

    fn track_success(&self, metrics: &Self::Metrics) -> Self::Metrics {
        self.push(metrics, false)
    }

    fn track_failure(&self, metrics: &Self::Metrics) -> Self::Metrics {
        self.push(metrics, true)
    }
}

impl CountSlidingWindowPolicy {
    fn push(&self, metrics: &WindowMetrics, is_failure: bool) -> WindowMetrics {
        let mut window = metrics.0.clone();
        if window.len() >= self.window_size {
            window.pop_front();
        }
        window.push_back(is_failure);
        WindowMetrics(window)
    }
}

/// Trips when the failure rate over the last `window` wall-clock duration
/// exceeds `failure_rate`, requiring at least `minimum_calls` samples inside
/// the window. Samples older than `window` are discarded lazily on each track.
#[derive(Debug, Clone)]
pub struct SamplingTimeWindowPolicy {
    pub window: Duration,
    pub minimum_calls: usize,
    pub failure_rate: f64,
    pub recovery_timeout: Duration,
}

/// `(age_millis_at_insert, is_failure)`; age is relative to provider-supplied clock millis.
#[derive(Debug, Clone, Default)]
pub struct TimeWindowMetrics(VecDeque<(u64, bool)>);

impl TimeWindowMetrics {
    /// Drop samples older than `window` as of `now_millis`.
    pub fn evict_before(&mut self, now_millis: u64, window: Duration) {
        let cutoff = now_millis.saturating_sub(window.as_millis() as u64);
        while matches!(self.0.front(), Some((ts, _)) if *ts < cutoff) {
            self.0.pop_front();
        }
    }
}

impl CircuitBreakerPolicyKind for SamplingTimeWindowPolicy {
    type Metrics = TimeWindowMetrics;

    fn initial_metrics(&self) -> Self::Metrics {
        TimeWindowMetrics::default()
    }

    fn when_closed(&self, metrics: &Self::Metrics) -> PolicyOutcome {
        if metrics.0.len() < self.minimum_calls {
            return PolicyOutcome::StayClosed;
        }
        let failures = metrics.0.iter().filter(|(_, f)| *f).count();
        let rate = failures as f64 / metrics.0.len() as f64;
        if rate >= self.failure_rate {
            PolicyOutcome::TripOpen
        } else {
            PolicyOutcome::StayClosed
        }
    }

    fn when_half_opened(&self, elapsed_since_open: Duration) -> bool {
        elapsed_since_open >= self.recovery_timeout
    }

    // Pure-function contract doesn't have access to "now"; the provider calls
    // `evict_before` itself before invoking these, passing an already-pruned
    // snapshot in `metrics`, then appends the new sample with its own clock.
    fn track_success(&self, metrics: &Self::Metrics) -> Self::Metrics {
        metrics.clone()
    }

    fn track_failure(&self, metrics: &Self::Metrics) -> Self::Metrics {
        metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_policy_trips_at_threshold() {
        let policy = ConsecutivePolicy { threshold: 3, success_threshold: 1, recovery_timeout: Duration::from_secs(1) };
        let mut metrics = policy.initial_metrics();
        for _ in 0..2 {
            metrics = policy.track_failure(&metrics);
            assert_eq!(policy.when_closed(&metrics), PolicyOutcome::StayClosed);
        }
        metrics = policy.track_failure(&metrics);
        assert_eq!(policy.when_closed(&metrics), PolicyOutcome::TripOpen);
    }

    #[test]
    fn consecutive_policy_resets_on_success() {
        let policy = ConsecutivePolicy { threshold: 2, success_threshold: 1, recovery_timeout: Duration::from_secs(1) };
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_failure(&metrics);
        metrics = policy.track_success(&metrics);
        metrics = policy.track_failure(&metrics);
        assert_eq!(policy.when_closed(&metrics), PolicyOutcome::StayClosed);
    }

    #[test]
    fn consecutive_policy_half_open_success_threshold_defaults_to_at_least_one() {
        let policy = ConsecutivePolicy { threshold: 2, success_threshold: 0, recovery_timeout: Duration::from_secs(1) };
        assert_eq!(policy.half_open_success_threshold(), 1);
        let policy = ConsecutivePolicy { threshold: 2, success_threshold: 2, recovery_timeout: Duration::from_secs(1) };
        assert_eq!(policy.half_open_success_threshold(), 2);
    }

    #[test]
    fn count_sliding_window_trips_on_rate() {
        let policy = CountSlidingWindowPolicy {
            window_size: 10,
            minimum_calls: 4,
            failure_rate: 0.5,
            recovery_timeout: Duration::from_secs(1),
        };
        let mut metrics = policy.initial_metrics();
        for _ in 0..2 {
            metrics = policy.track_failure(&metrics);
        }
        for _ in 0..2 {
            metrics = policy.track_success(&metrics);
        }
        assert_eq!(policy.when_closed(&metrics), PolicyOutcome::TripOpen);
    }

    #[test]
    fn count_sliding_window_ignores_below_minimum_calls() {
        let policy = CountSlidingWindowPolicy {
            window_size: 10,
            minimum_calls: 5,
            failure_rate: 0.1,
            recovery_timeout: Duration::from_secs(1),
        };
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_failure(&metrics);
        assert_eq!(policy.when_closed(&metrics), PolicyOutcome::StayClosed);
    }

    #[test]
    fn count_sliding_window_evicts_oldest_beyond_capacity() {
        let policy = CountSlidingWindowPolicy {
            window_size: 3,
            minimum_calls: 1,
            failure_rate: 0.99,
            recovery_timeout: Duration::from_secs(1),
        };
        let mut metrics = policy.initial_metrics();
        metrics = policy.track_failure(&metrics);
        metrics = policy.track_failure(&metrics);
        metrics = policy.track_failure(&metrics);
        metrics = policy.track_success(&metrics);
        assert_eq!(metrics.0.len(), 3);
        assert_eq!(metrics.0.iter().filter(|b| **b).count(), 2);
    }

    #[test]
    fn time_window_metrics_evicts_stale_samples() {
        let mut metrics = TimeWindowMetrics(VecDeque::from(vec![(0, true), (500, false)]));
        metrics.evict_before(2000, Duration::from_secs(1));
        assert_eq!(metrics.0.len(), 1);
        assert_eq!(metrics.0[0].0, 500);
    }
}
