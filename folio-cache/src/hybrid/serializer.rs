//! Whole-node values for the two-tier cache.
//!
//! A node is written as a tagged MessagePack "shell" holding its identity,
//! tree and version metadata, and the still-encoded data model of each
//! state, sealed in a [`PayloadKind::Node`] envelope. The inner payloads are
//! carried opaque; reading a shell never decodes property or culture data.
//!
//! | tag | node field      | tag | state field   |
//! |-----|-----------------|-----|---------------|
//! | 0   | id              | 0   | name          |
//! | 1   | key (16 bytes)  | 1   | version id    |
//! | 2   | content type id | 2   | version date  |
//! | 3   | sort order      | 3   | writer id     |
//! | 4   | create date     | 4   | template id   |
//! | 5   | creator id      | 5   | data model    |
//! | 6   | entity kind     |     |               |
//! | 7   | draft state     |     |               |
//! | 8   | published state |     |               |

use std::fmt;
use std::sync::Arc;

use folio_core::{CacheSettings, CodecError, EntityKind, Timestamp};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::traits::CacheValueSerializer;
use crate::envelope::{self, EnvelopeOptions, PayloadKind};
use crate::intern::Interner;
use crate::node::{ContentCacheNode, NodeHeader, StateMetadata, StoredState};
use crate::serializer::{ContentCacheDataSerializer, SerializedPayload, SerializerFactory};
use crate::wire::{self, Field, FieldSeed, TimestampValue, WireFormat, WireTimestamp};

const FORMAT: WireFormat = WireFormat::Tagged;

const NODE_ID: Field = Field::new(0, "id");
const NODE_KEY: Field = Field::new(1, "key");
const NODE_CONTENT_TYPE: Field = Field::new(2, "ct");
const NODE_SORT_ORDER: Field = Field::new(3, "so");
const NODE_CREATE_DATE: Field = Field::new(4, "cd");
const NODE_CREATOR: Field = Field::new(5, "cr");
const NODE_KIND: Field = Field::new(6, "k");
const NODE_DRAFT: Field = Field::new(7, "dr");
const NODE_PUBLISHED: Field = Field::new(8, "pb");

const NODE_FIELDS: &[Field] = &[
    NODE_ID,
    NODE_KEY,
    NODE_CONTENT_TYPE,
    NODE_SORT_ORDER,
    NODE_CREATE_DATE,
    NODE_CREATOR,
    NODE_KIND,
    NODE_DRAFT,
    NODE_PUBLISHED,
];

const STATE_NAME: Field = Field::new(0, "nm");
const STATE_VERSION_ID: Field = Field::new(1, "vid");
const STATE_VERSION_DATE: Field = Field::new(2, "vd");
const STATE_WRITER: Field = Field::new(3, "wr");
const STATE_TEMPLATE: Field = Field::new(4, "tpl");
const STATE_DATA: Field = Field::new(5, "d");

const STATE_FIELDS: &[Field] = &[
    STATE_NAME,
    STATE_VERSION_ID,
    STATE_VERSION_DATE,
    STATE_WRITER,
    STATE_TEMPLATE,
    STATE_DATA,
];

/// [`CacheValueSerializer`] for [`ContentCacheNode`].
#[derive(Debug, Clone)]
pub struct HybridCacheSerializer {
    factory: SerializerFactory,
    envelope: EnvelopeOptions,
}

impl HybridCacheSerializer {
    pub fn new(factory: SerializerFactory, envelope: EnvelopeOptions) -> Self {
        Self { factory, envelope }
    }

    pub fn from_settings(settings: &CacheSettings, interner: Arc<dyn Interner>) -> Self {
        Self::new(
            SerializerFactory::from_settings(settings, interner),
            EnvelopeOptions::from_settings(settings),
        )
    }

    pub fn factory(&self) -> &SerializerFactory {
        &self.factory
    }

    /// Encode a whole node.
    pub fn encode_node(&self, node: &ContentCacheNode) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::new();
        NodeShell(node)
            .serialize(&mut rmp_serde::Serializer::new(&mut body))
            .map_err(CodecError::fault)?;
        envelope::seal(PayloadKind::Node, &body, &self.envelope)
    }

    /// Decode a whole node, reporting every failure.
    pub fn decode_node(&self, bytes: &[u8]) -> Result<ContentCacheNode, CodecError> {
        let body = envelope::open(PayloadKind::Node, bytes, &self.envelope)?;
        let shell: DecodedNode = wire::decode_tagged(&body, |de| DecodedNode::deserialize(de))?;
        let serializer = self.strategy_for(&shell)?;
        Ok(ContentCacheNode::new(
            shell.header,
            shell.draft,
            shell.published,
            serializer,
        ))
    }

    /// Strategy that reads the node's payloads: chosen by payload channel,
    /// falling back to the configured strategy for nodes with no state.
    fn strategy_for(&self, shell: &DecodedNode) -> Result<Arc<dyn ContentCacheDataSerializer>, CodecError> {
        let channels: Vec<_> = [&shell.draft, &shell.published]
            .into_iter()
            .flatten()
            .map(|state| state.payload.channel())
            .collect();

        match channels.as_slice() {
            [] => self
                .factory
                .for_kind(shell.header.kind)
                .map_err(CodecError::corrupt),
            [first, rest @ ..] => {
                if rest.iter().any(|c| c != first) {
                    return Err(CodecError::corrupt("node states use different payload channels"));
                }
                self.factory
                    .for_channel(*first)
                    .ok_or_else(|| CodecError::corrupt(format!("no serializer reads {first} payloads")))
            }
        }
    }
}

impl CacheValueSerializer<ContentCacheNode> for HybridCacheSerializer {
    fn serialize(&self, value: &ContentCacheNode) -> Result<Vec<u8>, CodecError> {
        self.encode_node(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> Option<ContentCacheNode> {
        match self.decode_node(bytes) {
            Ok(node) => Some(node),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    len = bytes.len(),
                    "Failed to deserialize cached node, treating as miss"
                );
                None
            }
        }
    }
}

// ============================================================================
// ENCODE
// ============================================================================

struct NodeShell<'a>(&'a ContentCacheNode);

impl Serialize for NodeShell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.0;
        let header = node.header();
        let draft = node.state(false);
        let published = node.state(true);

        let len = 7 + usize::from(draft.is_some()) + usize::from(published.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(&NODE_ID.key(FORMAT), &header.id)?;
        map.serialize_entry(&NODE_KEY.key(FORMAT), &RawBytes(header.key.as_bytes()))?;
        map.serialize_entry(&NODE_CONTENT_TYPE.key(FORMAT), &header.content_type_id)?;
        map.serialize_entry(&NODE_SORT_ORDER.key(FORMAT), &header.sort_order)?;
        map.serialize_entry(
            &NODE_CREATE_DATE.key(FORMAT),
            &WireTimestamp(&header.create_date, FORMAT),
        )?;
        map.serialize_entry(&NODE_CREATOR.key(FORMAT), &header.creator_id)?;
        map.serialize_entry(&NODE_KIND.key(FORMAT), &header.kind.as_byte())?;
        if let Some(state) = draft {
            map.serialize_entry(&NODE_DRAFT.key(FORMAT), &StateShell(state))?;
        }
        if let Some(state) = published {
            map.serialize_entry(&NODE_PUBLISHED.key(FORMAT), &StateShell(state))?;
        }
        map.end()
    }
}

struct StateShell<'a>(&'a StoredState);

impl Serialize for StateShell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let meta = &self.0.metadata;
        let len = 5 + usize::from(meta.template_id.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(&STATE_NAME.key(FORMAT), &meta.name)?;
        map.serialize_entry(&STATE_VERSION_ID.key(FORMAT), &meta.version_id)?;
        map.serialize_entry(
            &STATE_VERSION_DATE.key(FORMAT),
            &WireTimestamp(&meta.version_date, FORMAT),
        )?;
        map.serialize_entry(&STATE_WRITER.key(FORMAT), &meta.writer_id)?;
        if let Some(template_id) = meta.template_id {
            map.serialize_entry(&STATE_TEMPLATE.key(FORMAT), &template_id)?;
        }
        map.serialize_entry(&STATE_DATA.key(FORMAT), &PayloadShell(&self.0.payload))?;
        map.end()
    }
}

/// Text payloads are written as strings, binary payloads as bytes.
struct PayloadShell<'a>(&'a SerializedPayload);

impl Serialize for PayloadShell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            SerializedPayload::Text(text) => serializer.serialize_str(text),
            SerializedPayload::Binary(bytes) => serializer.serialize_bytes(bytes),
        }
    }
}

struct RawBytes<'a>(&'a [u8]);

impl Serialize for RawBytes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

// ============================================================================
// DECODE
// ============================================================================

struct DecodedNode {
    header: NodeHeader,
    draft: Option<StoredState>,
    published: Option<StoredState>,
}

impl<'de> Deserialize<'de> for DecodedNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = DecodedNode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cached content node")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<DecodedNode, A::Error> {
                let mut id = None;
                let mut key = None;
                let mut content_type_id = None;
                let mut sort_order = None;
                let mut create_date: Option<Timestamp> = None;
                let mut creator_id = None;
                let mut kind = None;
                let mut draft = None;
                let mut published = None;

                while let Some(tag) = map.next_key_seed(FieldSeed(NODE_FIELDS))? {
                    match tag {
                        Some(0) => id = Some(map.next_value()?),
                        Some(1) => key = Some(map.next_value::<KeyBytes>()?.0),
                        Some(2) => content_type_id = Some(map.next_value()?),
                        Some(3) => sort_order = Some(map.next_value()?),
                        Some(4) => create_date = Some(map.next_value::<TimestampValue>()?.0),
                        Some(5) => creator_id = Some(map.next_value()?),
                        Some(6) => {
                            let byte: u8 = map.next_value()?;
                            kind = Some(EntityKind::from_byte(byte).ok_or_else(|| {
                                de::Error::custom(format!("unknown entity kind {byte}"))
                            })?);
                        }
                        Some(7) => draft = Some(map.next_value::<DecodedState>()?.0),
                        Some(8) => published = Some(map.next_value::<DecodedState>()?.0),
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                Ok(DecodedNode {
                    header: NodeHeader {
                        id: id.ok_or_else(|| de::Error::missing_field(NODE_ID.name))?,
                        key: key.ok_or_else(|| de::Error::missing_field(NODE_KEY.name))?,
                        kind: kind.ok_or_else(|| de::Error::missing_field(NODE_KIND.name))?,
                        content_type_id: content_type_id
                            .ok_or_else(|| de::Error::missing_field(NODE_CONTENT_TYPE.name))?,
                        sort_order: sort_order.unwrap_or(0),
                        create_date: create_date
                            .ok_or_else(|| de::Error::missing_field(NODE_CREATE_DATE.name))?,
                        creator_id: creator_id.unwrap_or(0),
                    },
                    draft,
                    published,
                })
            }
        }

        deserializer.deserialize_map(NodeVisitor)
    }
}

struct DecodedState(StoredState);

impl<'de> Deserialize<'de> for DecodedState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StateVisitor;

        impl<'de> Visitor<'de> for StateVisitor {
            type Value = DecodedState;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cached node state")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<DecodedState, A::Error> {
                let mut name = None;
                let mut version_id = None;
                let mut version_date: Option<Timestamp> = None;
                let mut writer_id = None;
                let mut template_id = None;
                let mut payload = None;

                while let Some(tag) = map.next_key_seed(FieldSeed(STATE_FIELDS))? {
                    match tag {
                        Some(0) => name = Some(map.next_value()?),
                        Some(1) => version_id = Some(map.next_value()?),
                        Some(2) => version_date = Some(map.next_value::<TimestampValue>()?.0),
                        Some(3) => writer_id = Some(map.next_value()?),
                        Some(4) => template_id = map.next_value()?,
                        Some(5) => payload = Some(map.next_value::<DecodedPayload>()?.0),
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                Ok(DecodedState(StoredState {
                    metadata: StateMetadata {
                        name: name.unwrap_or_default(),
                        version_id: version_id
                            .ok_or_else(|| de::Error::missing_field(STATE_VERSION_ID.name))?,
                        version_date: version_date
                            .ok_or_else(|| de::Error::missing_field(STATE_VERSION_DATE.name))?,
                        writer_id: writer_id.unwrap_or(0),
                        template_id,
                    },
                    payload: payload.ok_or_else(|| de::Error::missing_field(STATE_DATA.name))?,
                }))
            }
        }

        deserializer.deserialize_map(StateVisitor)
    }
}

struct DecodedPayload(SerializedPayload);

impl<'de> Deserialize<'de> for DecodedPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = DecodedPayload;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a text or binary payload")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DecodedPayload, E> {
                Ok(DecodedPayload(SerializedPayload::Text(v.to_string())))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<DecodedPayload, E> {
                Ok(DecodedPayload(SerializedPayload::Text(v)))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<DecodedPayload, E> {
                Ok(DecodedPayload(SerializedPayload::Binary(v.to_vec())))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<DecodedPayload, E> {
                Ok(DecodedPayload(SerializedPayload::Binary(v)))
            }
        }

        deserializer.deserialize_any(PayloadVisitor)
    }
}

struct KeyBytes(Uuid);

impl<'de> Deserialize<'de> for KeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = KeyBytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("16 key bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<KeyBytes, E> {
                Uuid::from_slice(v)
                    .map(KeyBytes)
                    .map_err(|_| E::invalid_length(v.len(), &self))
            }
        }

        deserializer.deserialize_bytes(KeyVisitor)
    }
}
