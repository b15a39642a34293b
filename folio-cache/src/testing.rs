//! Test doubles shared by the unit test modules.

use crate::model::ContentCacheDataModel;
use crate::serializer::{ContentCacheDataSerializer, PayloadRef, SerializedPayload};
use async_trait::async_trait;
use dashmap::DashMap;
use folio_core::{
    CacheError, CodecError, ContentSnapshot, ContentSource, EntityKind, NodeKey, SerializerKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

use crate::hybrid::ContentNodeSource;

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wraps a serializer and counts decode attempts.
#[derive(Debug)]
pub struct CountingSerializer {
    inner: Arc<dyn ContentCacheDataSerializer>,
    decodes: AtomicUsize,
}

impl CountingSerializer {
    pub fn new(inner: Arc<dyn ContentCacheDataSerializer>) -> Self {
        Self {
            inner,
            decodes: AtomicUsize::new(0),
        }
    }

    pub fn decode_calls(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl ContentCacheDataSerializer for CountingSerializer {
    fn kind(&self) -> SerializerKind {
        self.inner.kind()
    }

    fn serialize(
        &self,
        content: &dyn ContentSource,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedPayload, CodecError> {
        self.inner.serialize(content, model, published)
    }

    fn try_deserialize(
        &self,
        content: &dyn ContentSource,
        payload: PayloadRef<'_>,
        published: bool,
    ) -> Result<ContentCacheDataModel, CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.try_deserialize(content, payload, published)
    }
}

/// Source of truth backed by a map, with an optional gate that holds every
/// load until permits are added. A gated load returns the snapshot that was
/// current when it started.
#[derive(Default)]
pub struct FakeSource {
    snapshots: DashMap<NodeKey, ContentSnapshot>,
    loads: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source whose loads block until [`FakeSource::open_gate`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn with(self, snapshot: ContentSnapshot) -> Self {
        self.put(snapshot);
        self
    }

    pub fn put(&self, snapshot: ContentSnapshot) {
        self.snapshots.insert(snapshot.key, snapshot);
    }

    pub fn remove(&self, key: NodeKey) {
        self.snapshots.remove(&key);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Resolves once a load has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(64);
        }
    }
}

#[async_trait]
impl ContentNodeSource for FakeSource {
    async fn load(&self, _kind: EntityKind, key: NodeKey) -> Result<Option<ContentSnapshot>, CacheError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshots.get(&key).map(|s| s.value().clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| CacheError::TierUnavailable {
                reason: "gate closed".to_string(),
            })?;
        }
        Ok(snapshot)
    }
}
