//! FOLIO Core - Shared Types
//!
//! Identity, entity kinds, serializer flags, settings, errors and the
//! read-only content input shape. Every other FOLIO crate depends on this.
//! This crate contains no codec or cache logic.

pub mod config;
pub mod content;
pub mod enums;
pub mod error;
pub mod identity;

pub use config::{CacheSettings, CompressionSettings, HybridCacheSettings, SerializerSettings};
pub use content::{
    ContentSnapshot, ContentSource, ContentTypeRef, CultureSnapshot, NodeIdentity,
    PropertySnapshot, PropertyTypeRef, PropertyValueSnapshot, StateSnapshot,
};
pub use enums::{
    ContentVariation, EntityKind, PayloadChannel, SerializerEntityType, SerializerKind,
    SerializerKindParseError,
};
pub use error::{CacheError, CodecError, ConfigError, FolioError, FolioResult};
pub use identity::{
    eq_ignore_case, fold_case, new_node_key, ContentTypeId, NodeId, NodeKey, Timestamp, UserId,
    INVARIANT_CULTURE, NO_SEGMENT,
};
