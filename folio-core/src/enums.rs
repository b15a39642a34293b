//! Enum and flag types for FOLIO cache entities

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTITY KINDS
// ============================================================================

/// Kind of a cached content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Document,
    Media,
    Member,
}

impl EntityKind {
    /// All entity kinds, in discriminant order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Document, EntityKind::Media, EntityKind::Member];

    /// Single-byte discriminant used in binary keys and node shells.
    pub fn as_byte(&self) -> u8 {
        match self {
            EntityKind::Document => 0,
            EntityKind::Media => 1,
            EntityKind::Member => 2,
        }
    }

    /// Parse a single-byte discriminant.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(EntityKind::Document),
            1 => Some(EntityKind::Media),
            2 => Some(EntityKind::Member),
            _ => None,
        }
    }

    /// The serializer flag selecting this kind.
    pub fn as_flag(&self) -> SerializerEntityType {
        match self {
            EntityKind::Document => SerializerEntityType::DOCUMENT,
            EntityKind::Media => SerializerEntityType::MEDIA,
            EntityKind::Member => SerializerEntityType::MEMBER,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Document => "document",
            EntityKind::Media => "media",
            EntityKind::Member => "member",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SERIALIZER FLAGS
// ============================================================================

bitflags! {
    /// Entity types a serializer is requested for.
    ///
    /// Rebuilds ask for several types at once; the factory refuses a
    /// combination whose members are configured with different formats.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SerializerEntityType: u8 {
        const DOCUMENT = 0b0000_0001;
        const MEDIA = 0b0000_0010;
        const MEMBER = 0b0000_0100;
    }
}

impl SerializerEntityType {
    /// Entity kinds selected by these flags.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        EntityKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.as_flag()))
    }
}

impl From<EntityKind> for SerializerEntityType {
    fn from(kind: EntityKind) -> Self {
        kind.as_flag()
    }
}

// ============================================================================
// WIRE FORMATS
// ============================================================================

/// Wire format used for a content data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// UTF-8 JSON text, short field names, nulls omitted.
    Json,
    /// Tagged MessagePack, enveloped and LZ4-compressed.
    #[default]
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl SerializerKind {
    /// The payload channel this format writes to.
    pub fn channel(&self) -> PayloadChannel {
        match self {
            SerializerKind::Json => PayloadChannel::Text,
            SerializerKind::MessagePack => PayloadChannel::Binary,
        }
    }
}

impl FromStr for SerializerKind {
    type Err = SerializerKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "messagepack" | "msgpack" => Ok(SerializerKind::MessagePack),
            _ => Err(SerializerKindParseError(s.to_string())),
        }
    }
}

/// Error parsing a serializer kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerKindParseError(pub String);

impl fmt::Display for SerializerKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid serializer kind: {}", self.0)
    }
}

impl std::error::Error for SerializerKindParseError {}

/// Output channel of a serializer: a stored row carries text or bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadChannel {
    Text,
    Binary,
}

impl fmt::Display for PayloadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadChannel::Text => f.write_str("text"),
            PayloadChannel::Binary => f.write_str("binary"),
        }
    }
}

// ============================================================================
// VARIATION
// ============================================================================

bitflags! {
    /// How a content type or property type varies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContentVariation: u8 {
        const CULTURE = 0b0000_0001;
        const SEGMENT = 0b0000_0010;
    }
}

impl ContentVariation {
    /// Invariant: neither culture nor segment.
    pub const NOTHING: ContentVariation = ContentVariation::empty();

    pub fn varies_by_culture(&self) -> bool {
        self.contains(ContentVariation::CULTURE)
    }

    pub fn varies_by_segment(&self) -> bool {
        self.contains(ContentVariation::SEGMENT)
    }

    /// Whether a value stored for `culture`/`segment` is valid under this
    /// variation. Empty strings mean invariant / unsegmented.
    pub fn supports(&self, culture: &str, segment: &str) -> bool {
        let culture_ok = if self.varies_by_culture() {
            !culture.is_empty()
        } else {
            culture.is_empty()
        };
        let segment_ok = self.varies_by_segment() || segment.is_empty();
        culture_ok && segment_ok
    }
}

// Manual serde implementation for ContentVariation (bitflags 2.x + serde)
impl Serialize for ContentVariation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentVariation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Self::from_bits(bits).ok_or_else(|| {
            serde::de::Error::custom(format!("invalid ContentVariation bits: {:#04x}", bits))
        })
    }
}
