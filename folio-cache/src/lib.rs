//! FOLIO Cache - Content Cache Codecs and Read Model
//!
//! Serializes node states into compact cached payloads, decodes them lazily
//! on first read, and keeps nodes in a two-tier (in-process + LMDB) cache.
//!
//! - [`model`]: the property bag of one node state
//! - [`dictionary`]: case-insensitive maps and their interning codec
//! - [`serializer`]: binary and JSON payload strategies, chosen per entity kind
//! - [`node`]: cached nodes that decode each state at most once
//! - [`hybrid`]: the two-tier cache and its distributed-tier serializer
//! - [`published`]: property access with culture fallback and value conversion

pub mod builder;
pub mod dictionary;
pub mod envelope;
pub mod hybrid;
pub mod intern;
pub mod model;
pub mod node;
pub mod published;
pub mod serializer;
pub mod wire;

#[cfg(test)]
mod testing;

pub use builder::ContentDataBuilder;
pub use dictionary::{CaseInsensitiveMap, DictionaryCodec};
pub use envelope::{EnvelopeOptions, LazyText, PayloadKind};
pub use hybrid::{
    open_distributed, CacheStats, CacheValueSerializer, ContentNodeSource, DistributedCache,
    DistributedEntry, EntryState, HybridCache, HybridCacheSerializer, HybridCacheStats,
    InMemoryDistributedCache, LmdbCacheError, LmdbDistributedCache, NodeCacheKey,
};
pub use intern::{InternPool, Interner};
pub use model::{ContentCacheDataModel, CultureVariation, PropertyValueEntry, RawValue};
pub use node::{ContentCacheNode, NodeData, NodeHeader, StateMetadata, StoredState};
pub use published::{
    ConvertedValue, ConverterRegistry, IntegerValueConverter, JsonValueConverter,
    PropertyValueConverter, PublishedContent, TextValueConverter,
};
pub use serializer::{
    BinaryContentSerializer, ContentCacheDataSerializer, EditorPropertyCompression,
    JsonContentSerializer, NoPropertyCompression, PayloadRef, PropertyCacheCompression,
    SerializedPayload, SerializerFactory,
};
pub use wire::WireFormat;
