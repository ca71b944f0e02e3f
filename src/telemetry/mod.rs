//! Telemetry and observability for Warden policies.
//!
//! This module provides the event system that enables all policies to emit
//! structured telemetry. Events flow through `TelemetrySink` implementations
//! which can log, aggregate, or forward events to external systems.
//!
//! # Event Types
//!
//! Each policy type emits specific events:
//!
//! - **Retry**: `RetryAttempt`, `RetryExhausted`
//! - **Circuit Breaker**: `CircuitOpened`, `CircuitClosed`, `CircuitHalfOpen`
//! - **Semaphore**: `SemaphoreAcquired`, `SemaphoreRejected`
//! - **Timeout**: `TimeoutOccurred`
//! - **All policies**: `RequestSuccess`, `RequestFailure`
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<PolicyEvent>` for composability.

pub mod events;
pub mod sinks;

pub use events::{
    SemaphoreEvent, CircuitBreakerEvent, PolicyEvent, RequestOutcome, RetryEvent, TimeoutEvent,
};
pub use sinks::{
    emit_best_effort, ComposedSinkError, FallbackSink, LogSink, MemorySink, MulticastSink,
    NonBlockingSink, NullSink, StreamingSink, TelemetrySink,
};

use std::sync::Arc;

/// A type-erased, synchronous hook a primitive or middleware calls to emit one
/// [`PolicyEvent`], without itself needing to be async or generic over a sink
/// type. Build one from a concrete sink with [`sink_listener`].
pub type PolicyEventListener = Arc<dyn Fn(PolicyEvent) + Send + Sync>;

/// Bridge a [`TelemetrySink`] into a [`PolicyEventListener`]: every call
/// spawns a best-effort emit on the current Tokio runtime rather than
/// blocking the caller on the sink's `poll_ready`/`call`.
pub fn sink_listener<S>(sink: S) -> PolicyEventListener
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    Arc::new(move |event| {
        let sink = sink.clone();
        tokio::spawn(emit_best_effort(sink, event));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{RetryEvent, TimeoutEvent};
    use sinks::MemorySink;
    use std::time::Duration;

    #[tokio::test]
    async fn sink_listener_forwards_events_to_the_wrapped_sink() {
        let sink = MemorySink::new();
        let listener = sink_listener(sink.clone());

        listener(PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_millis(5) }));
        listener(PolicyEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1) }));

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(sink.len(), 2);
    }
}