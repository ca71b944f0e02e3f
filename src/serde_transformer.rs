//! Cross-process handle revival: lets one process serialize a lock or
//! semaphore handle and another process, sharing the same backing store,
//! deserialize it back into a live handle it can call `release`/`refresh` on.
//!
//! The registry tries each registered [`SerdeTransformer`] in order until
//! one claims applicability and successfully deserializes, generalizing the
//! primary/fallback composition in `algebra::Policy`'s `BitOr` and
//! `telemetry::sinks::FallbackSink` from two candidates to N.

use crate::coordination::lock::{LockAdapter, LockHandle, LockProvider};
use crate::coordination::semaphore::{SemaphoreAdapter, SemaphoreHandle, SemaphoreProvider};
use std::sync::Arc;
use std::time::Duration;

/// Identifies which transformer produced a serialized handle. A handle's
/// cross-process identity is the tuple `(domain, serde_transformer_name,
/// adapter_type_tag, namespace_prefixed)`; blank segments are dropped when
/// rendering it as a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleTag {
    pub domain: String,
    pub serde_transformer_name: String,
    pub adapter_type_tag: String,
    pub namespace_prefixed: String,
}

impl HandleTag {
    pub fn segments(&self) -> Vec<String> {
        [
            self.domain.as_str(),
            self.serde_transformer_name.as_str(),
            self.adapter_type_tag.as_str(),
            self.namespace_prefixed.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
    }
}

/// Wire shape a [`SerdeTransformer`] serializes a handle into and revives it
/// from. Only handles with their own generated identity (a lock's `lock_id`,
/// a semaphore's `slot_id`) need reviving across a process boundary; a cache
/// entry has no handle object and a circuit breaker's key alone identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedPayload {
    Lock { segments: Vec<String>, ttl_millis: Option<u64>, lock_id: String },
    Semaphore { segments: Vec<String>, ttl_millis: Option<u64>, slot_id: String, limit: usize },
}

pub trait SerdeTransformer: Send + Sync {
    type Handle;

    fn tag(&self) -> HandleTag;

    /// Whether this transformer produced `candidate`. The default compares
    /// the dropped-blanks segment form, so two tags differing only in an
    /// empty `adapter_type_tag` still match.
    fn is_applicable(&self, candidate: &HandleTag) -> bool {
        self.tag().segments() == candidate.segments()
    }

    fn serialize(&self, handle: &Self::Handle) -> SerializedPayload;
    fn deserialize(&self, payload: &SerializedPayload) -> Option<Self::Handle>;
}

/// Tries each registered transformer, in registration order, until one both
/// claims the tag and successfully deserializes.
pub struct TransformerRegistry<H> {
    transformers: Vec<Arc<dyn SerdeTransformer<Handle = H>>>,
}

impl<H> Default for TransformerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> TransformerRegistry<H> {
    pub fn new() -> Self {
        Self { transformers: Vec::new() }
    }

    pub fn register(&mut self, transformer: Arc<dyn SerdeTransformer<Handle = H>>) -> &mut Self {
        self.transformers.push(transformer);
        self
    }

    pub fn serialize(&self, tag: &HandleTag, handle: &H) -> Option<SerializedPayload> {
        self.transformers.iter().find(|t| t.is_applicable(tag)).map(|t| t.serialize(handle))
    }

    pub fn deserialize(&self, tag: &HandleTag, payload: &SerializedPayload) -> Option<H> {
        for transformer in &self.transformers {
            if transformer.is_applicable(tag) {
                if let Some(handle) = transformer.deserialize(payload) {
                    return Some(handle);
                }
            }
        }
        None
    }
}

/// Revives [`LockHandle`]s minted by a given [`LockProvider`].
pub struct LockSerdeTransformer<A: LockAdapter> {
    provider: LockProvider<A>,
    serde_transformer_name: String,
    adapter_type_tag: String,
}

impl<A: LockAdapter> LockSerdeTransformer<A> {
    pub fn new(
        provider: LockProvider<A>,
        serde_transformer_name: impl Into<String>,
        adapter_type_tag: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            serde_transformer_name: serde_transformer_name.into(),
            adapter_type_tag: adapter_type_tag.into(),
        }
    }
}

impl<A: LockAdapter> SerdeTransformer for LockSerdeTransformer<A> {
    type Handle = LockHandle<A>;

    fn tag(&self) -> HandleTag {
        HandleTag {
            domain: "lock".to_string(),
            serde_transformer_name: self.serde_transformer_name.clone(),
            adapter_type_tag: self.adapter_type_tag.clone(),
            namespace_prefixed: self.provider.namespace().prefixed(),
        }
    }

    fn serialize(&self, handle: &LockHandle<A>) -> SerializedPayload {
        SerializedPayload::Lock {
            segments: handle.key().segments().to_vec(),
            ttl_millis: handle.ttl().map(|d| d.as_millis() as u64),
            lock_id: handle.lock_id().to_string(),
        }
    }

    fn deserialize(&self, payload: &SerializedPayload) -> Option<LockHandle<A>> {
        let SerializedPayload::Lock { segments, ttl_millis, lock_id } = payload else {
            return None;
        };
        let ttl = ttl_millis.map(Duration::from_millis);
        let handle = self.provider.create(segments.clone(), ttl).ok()?;
        Some(handle.with_lock_id(lock_id.clone()))
    }
}

/// Revives [`SemaphoreHandle`]s minted by a given [`SemaphoreProvider`].
pub struct SemaphoreSerdeTransformer<A: SemaphoreAdapter> {
    provider: SemaphoreProvider<A>,
    serde_transformer_name: String,
    adapter_type_tag: String,
}

impl<A: SemaphoreAdapter> SemaphoreSerdeTransformer<A> {
    pub fn new(
        provider: SemaphoreProvider<A>,
        serde_transformer_name: impl Into<String>,
        adapter_type_tag: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            serde_transformer_name: serde_transformer_name.into(),
            adapter_type_tag: adapter_type_tag.into(),
        }
    }
}

impl<A: SemaphoreAdapter> SerdeTransformer for SemaphoreSerdeTransformer<A> {
    type Handle = SemaphoreHandle<A>;

    fn tag(&self) -> HandleTag {
        HandleTag {
            domain: "semaphore".to_string(),
            serde_transformer_name: self.serde_transformer_name.clone(),
            adapter_type_tag: self.adapter_type_tag.clone(),
            namespace_prefixed: self.provider.namespace().prefixed(),
        }
    }

    fn serialize(&self, handle: &SemaphoreHandle<A>) -> SerializedPayload {
        SerializedPayload::Semaphore {
            segments: handle.key().segments().to_vec(),
            ttl_millis: handle.ttl().map(|d| d.as_millis() as u64),
            slot_id: handle.slot_id().to_string(),
            limit: handle.limit(),
        }
    }

    fn deserialize(&self, payload: &SerializedPayload) -> Option<SemaphoreHandle<A>> {
        let SerializedPayload::Semaphore { segments, ttl_millis, slot_id, limit } = payload else {
            return None;
        };
        let ttl = ttl_millis.map(Duration::from_millis);
        let handle = self.provider.create(segments.clone(), Some(*limit), ttl).ok()?;
        Some(handle.with_slot_id(slot_id.clone()))
    }
}
