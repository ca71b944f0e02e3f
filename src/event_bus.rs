//! General-purpose named-event bus shared by the coordination primitives.
//!
//! Generalizes the teacher's `telemetry::sinks` pattern (a fixed
//! `PolicyEvent` enum pushed through `tower::Service`) into an arbitrary
//! named-event surface: any provider (lock, semaphore, cache, circuit
//! breaker) can dispatch its own event names against one bus. Listener
//! storage keyed by `(event name, listener identity)` mirrors
//! `StreamingSink`'s broadcast-to-many-subscribers shape, but with explicit
//! identities so re-registering the same listener is a no-op rather than
//! producing a duplicate subscription.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A dispatched event: a name plus an arbitrary cloneable payload.
#[derive(Debug, Clone)]
pub struct Event<P> {
    pub name: String,
    pub payload: P,
}

pub type Listener<P> = Arc<dyn Fn(&Event<P>) + Send + Sync>;

/// A dispatch failed because a listener panicked.
#[derive(Debug)]
pub struct UnableToDispatchEventBusError {
    pub event_name: String,
    pub listener_identity: String,
}

impl fmt::Display for UnableToDispatchEventBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listener {:?} for event {:?} panicked during dispatch",
            self.listener_identity, self.event_name
        )
    }
}

impl std::error::Error for UnableToDispatchEventBusError {}

/// Drops its registration from the bus when called (or dropped, see
/// [`Unsubscribe::detach`] to opt out of that).
pub struct Unsubscribe {
    inner: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self { inner: Some(Box::new(f)) }
    }

    /// Remove the listener now. Safe to call more than once.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.inner.take() {
            f();
        }
    }

    /// Consume this handle without removing the listener.
    pub fn detach(mut self) {
        self.inner.take();
    }
}

struct Entry<P> {
    once: bool,
    listener: Listener<P>,
}

/// Listener store is a map `(eventName, listenerIdentity) -> listener`.
/// Re-registering the same pair is a no-op, matching the dedup contract.
pub struct EventBus<P> {
    listeners: Mutex<HashMap<(String, String), Entry<P>>>,
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.listeners.lock().unwrap_or_else(|p| p.into_inner()).len();
        f.debug_struct("EventBus").field("listener_count", &count).finish()
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventBus<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { listeners: Mutex::new(HashMap::new()) }
    }

    /// Register `listener` under `(event_name, listener_identity)`. A second
    /// registration of the same pair is a no-op.
    pub fn add_listener<F>(&self, event_name: impl Into<String>, listener_identity: impl Into<String>, listener: F)
    where
        F: Fn(&Event<P>) + Send + Sync + 'static,
    {
        self.insert(event_name.into(), listener_identity.into(), Arc::new(listener), false);
    }

    /// Like [`Self::add_listener`] but auto-removes after its first dispatch.
    pub fn listen_once<F>(&self, event_name: impl Into<String>, listener_identity: impl Into<String>, listener: F)
    where
        F: Fn(&Event<P>) + Send + Sync + 'static,
    {
        self.insert(event_name.into(), listener_identity.into(), Arc::new(listener), true);
    }

    fn insert(&self, event_name: String, listener_identity: String, listener: Listener<P>, once: bool) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        guard.entry((event_name, listener_identity)).or_insert(Entry { once, listener });
    }

    pub fn remove_listener(&self, event_name: &str, listener_identity: &str) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&(event_name.to_string(), listener_identity.to_string()));
    }

    /// Register under an auto-generated identity; the returned handle
    /// removes the listener when invoked.
    pub fn subscribe<F>(self: &Arc<Self>, event_name: impl Into<String>, listener: F) -> Unsubscribe
    where
        F: Fn(&Event<P>) + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        let identity = Uuid::new_v4().to_string();
        self.add_listener(event_name.clone(), identity.clone(), listener);
        let bus = self.clone();
        Unsubscribe::new(move || bus.remove_listener(&event_name, &identity))
    }

    pub fn subscribe_once<F>(self: &Arc<Self>, event_name: impl Into<String>, listener: F) -> Unsubscribe
    where
        F: Fn(&Event<P>) + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        let identity = Uuid::new_v4().to_string();
        self.listen_once(event_name.clone(), identity.clone(), listener);
        let bus = self.clone();
        Unsubscribe::new(move || bus.remove_listener(&event_name, &identity))
    }

    /// Returns a one-shot future that resolves with the next dispatched
    /// event matching `event_name`.
    pub fn as_task(self: &Arc<Self>, event_name: impl Into<String>) -> impl std::future::Future<Output = Event<P>> {
        let event_name = event_name.into();
        let identity = Uuid::new_v4().to_string();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.listen_once(event_name, identity, move |event| {
            if let Some(tx) = tx.lock().unwrap_or_else(|p| p.into_inner()).take() {
                let _ = tx.send(event.clone());
            }
        });
        async move { rx.await.expect("listener dropped without sending") }
    }

    /// Dispatch `payload` under `name` to every listener registered for it.
    /// A listener that panics is caught and reported as a dispatch error
    /// without preventing the remaining listeners from running.
    pub fn dispatch(&self, name: impl Into<String>, payload: P) -> Result<(), UnableToDispatchEventBusError> {
        let name = name.into();
        let event = Event { name: name.clone(), payload };

        let matching: Vec<((String, String), Listener<P>)> = {
            let guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
            guard
                .iter()
                .filter(|((event_name, _), _)| *event_name == name)
                .map(|(key, entry)| (key.clone(), entry.listener.clone()))
                .collect()
        };

        let mut first_panic: Option<UnableToDispatchEventBusError> = None;
        for ((event_name, listener_identity), listener) in &matching {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() && first_panic.is_none() {
                first_panic = Some(UnableToDispatchEventBusError {
                    event_name: event_name.clone(),
                    listener_identity: listener_identity.clone(),
                });
            }
        }

        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        for (key, _) in &matching {
            if guard.get(key).map(|e| e.once).unwrap_or(false) {
                guard.remove(key);
            }
        }
        drop(guard);

        match first_panic {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .filter(|(name, _)| name == event_name)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_registration_is_a_no_op() {
        let bus: EventBus<i32> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bus.add_listener("tick", "listener-a", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.add_listener("tick", "listener-a", |_| panic!("should not replace"));
        bus.dispatch("tick", 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("tick"), 1);
    }

    #[test]
    fn dispatch_only_reaches_matching_name() {
        let bus: EventBus<&'static str> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.add_listener("a", "x", move |e| seen_clone.lock().unwrap().push(e.payload));
        bus.dispatch("b", "ignored").unwrap();
        bus.dispatch("a", "matched").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["matched"]);
    }

    #[test]
    fn listen_once_auto_removes() {
        let bus: EventBus<i32> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bus.listen_once("e", "id", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.dispatch("e", 1).unwrap();
        bus.dispatch("e", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn remove_listener_stops_future_dispatch() {
        let bus: EventBus<i32> = EventBus::new();
        bus.add_listener("e", "id", |_| {});
        bus.remove_listener("e", "id");
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn subscribe_unsubscribe_removes_listener() {
        let bus = Arc::new(EventBus::<i32>::new());
        let unsub = bus.subscribe("e", |_| {});
        assert_eq!(bus.listener_count("e"), 1);
        unsub.unsubscribe();
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[tokio::test]
    async fn as_task_resolves_on_next_matching_event() {
        let bus = Arc::new(EventBus::<i32>::new());
        let fut = bus.as_task("e");
        bus.dispatch("e", 42).unwrap();
        let event = fut.await;
        assert_eq!(event.payload, 42);
    }

    #[test]
    fn panicking_listener_reports_error_but_others_still_run() {
        let bus: EventBus<i32> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bus.add_listener("e", "panicky", |_| panic!("boom"));
        bus.add_listener("e", "ok", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let result = bus.dispatch("e", 1);
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
