//! Serializer selection by entity type.

use super::{
    BinaryContentSerializer, ContentCacheDataSerializer, EditorPropertyCompression,
    JsonContentSerializer, PayloadRef, PropertyCacheCompression,
};
use crate::envelope::EnvelopeOptions;
use crate::intern::Interner;
use folio_core::{
    CacheSettings, ConfigError, EntityKind, PayloadChannel, SerializerEntityType, SerializerKind,
    SerializerSettings,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of serializer strategies keyed by wire format.
#[derive(Debug, Clone)]
pub struct SerializerFactory {
    settings: SerializerSettings,
    strategies: HashMap<SerializerKind, Arc<dyn ContentCacheDataSerializer>>,
}

impl SerializerFactory {
    /// Factory with no strategies registered.
    pub fn empty(settings: SerializerSettings) -> Self {
        Self {
            settings,
            strategies: HashMap::new(),
        }
    }

    /// Factory with the binary and JSON strategies built from `settings`.
    pub fn from_settings(settings: &CacheSettings, interner: Arc<dyn Interner>) -> Self {
        let compression: Arc<dyn PropertyCacheCompression> =
            Arc::new(EditorPropertyCompression::from_settings(&settings.compression));
        let binary = BinaryContentSerializer::new(
            Arc::clone(&interner),
            EnvelopeOptions::from_settings(settings),
        )
        .with_compression(compression);

        let mut factory = Self::empty(settings.serializers.clone());
        factory.register(Arc::new(binary));
        factory.register(Arc::new(JsonContentSerializer::new(interner)));
        factory
    }

    /// Register a strategy, replacing any with the same format.
    pub fn register(&mut self, strategy: Arc<dyn ContentCacheDataSerializer>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn settings(&self) -> &SerializerSettings {
        &self.settings
    }

    /// Strategy serving every entity type in `types`.
    ///
    /// Fails when the types map to different formats, when `types` is
    /// empty, or when the resolved format has no registered strategy.
    pub fn create(
        &self,
        types: SerializerEntityType,
    ) -> Result<Arc<dyn ContentCacheDataSerializer>, ConfigError> {
        let kind = self.settings.resolve(types)?;
        self.strategy(kind)
    }

    pub fn for_kind(&self, kind: EntityKind) -> Result<Arc<dyn ContentCacheDataSerializer>, ConfigError> {
        self.create(kind.as_flag())
    }

    /// Registered strategy for a wire format.
    pub fn strategy(&self, kind: SerializerKind) -> Result<Arc<dyn ContentCacheDataSerializer>, ConfigError> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("serializer strategy {kind:?}"),
            })
    }

    /// Strategy able to read a stored payload, whatever is configured now.
    pub fn for_payload(&self, payload: PayloadRef<'_>) -> Option<Arc<dyn ContentCacheDataSerializer>> {
        self.for_channel(payload.channel())
    }

    pub fn for_channel(&self, channel: PayloadChannel) -> Option<Arc<dyn ContentCacheDataSerializer>> {
        self.strategies
            .values()
            .find(|s| s.kind().channel() == channel)
            .cloned()
    }
}
