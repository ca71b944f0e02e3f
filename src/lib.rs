#![forbid(unsafe_code)]

//! # Warden
//!
//! A distributed coordination and resilience toolkit: retry, timeout,
//! fallback, and hedging middlewares; a pluggable circuit breaker; and
//! cross-process coordination primitives (distributed lock, semaphore,
//! cache) built on the same adapter/provider/handle shape.
//!
//! ## Resilience
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden::{Backoff, Jitter, ResilienceError, RetryPolicy, TimeoutPolicy};
//! use warden::resilience::ResilienceStack;
//!
//! async fn flaky_operation(
//!     attempts: Arc<AtomicUsize>,
//! ) -> Result<(), ResilienceError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(ResilienceError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ResilienceError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .expect("valid attempt count")
//!         .backoff(Backoff::exponential(Duration::from_millis(200), Duration::from_secs(5)))
//!         .with_jitter(Jitter::full())
//!         .build();
//!     let timeout = TimeoutPolicy::new(Duration::from_secs(2)).expect("valid timeout");
//!
//!     let stack: ResilienceStack<std::io::Error> =
//!         ResilienceStack::builder().retry(retry).timeout(timeout).build();
//!
//!     stack.execute(|| flaky_operation(attempts.clone())).await?;
//!     Ok(())
//! }
//! ```
//!
//! Fallback, hedging, and the circuit breaker compose by nesting rather than
//! by joining the same linear chain — see [`resilience`] and
//! [`circuit_breaker`] for why. Cross-process locks, semaphores, and caches
//! live under [`coordination`]; [`serde_transformer`] revives a handle one
//! process serialized inside another.

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod coordination;
pub mod error;
pub mod event_bus;
pub mod jitter;
pub mod middleware;
pub mod namespace;
pub mod resilience;
pub mod serde_transformer;
pub mod sleeper;
pub mod task;
pub mod telemetry;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ResilienceError, MAX_RETRY_FAILURES};
pub use event_bus::{Event, EventBus, Listener, UnableToDispatchEventBusError, Unsubscribe};
pub use jitter::Jitter;
pub use namespace::{Key, Namespace, NamespaceError};
pub use resilience::{RetryPolicy, RetryPolicyBuilder, TimeoutError, TimeoutPolicy, MAX_TIMEOUT};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use task::{CancelReason, Settled, Signal, Task};

pub mod prelude;
