//! Binary cache keys for content nodes.
//!
//! Published and preview nodes are cached under different keys so a preview
//! request can never be answered with a public node, or the reverse.

use folio_core::{EntityKind, NodeKey};
use std::fmt;
use uuid::Uuid;

/// Separator byte between the entity kind and the node key.
const SEPARATOR: u8 = 0xFF;

/// Length of an encoded [`NodeCacheKey`].
pub const ENCODED_KEY_LEN: usize = 19;

/// Cache key of one node in one view (published or preview).
///
/// # Binary Format
///
/// The key encodes to a fixed 19-byte array:
/// - Byte 0: entity kind discriminant
/// - Byte 1: separator (0xFF)
/// - Bytes 2-17: node key (UUID as bytes)
/// - Byte 18: preview flag (0 or 1)
///
/// Keys sort by entity kind first, so one kind's entries form a contiguous
/// range in the distributed tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeCacheKey {
    kind: EntityKind,
    key: NodeKey,
    preview: bool,
}

impl NodeCacheKey {
    pub fn new(kind: EntityKind, key: NodeKey, preview: bool) -> Self {
        Self { kind, key, preview }
    }

    /// Key of the public view of a node.
    pub fn published(kind: EntityKind, key: NodeKey) -> Self {
        Self::new(kind, key, false)
    }

    /// Key of the preview view of a node, which includes its draft.
    pub fn preview(kind: EntityKind, key: NodeKey) -> Self {
        Self::new(kind, key, true)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn node_key(&self) -> NodeKey {
        self.key
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    /// Encode to the fixed-size binary form.
    pub fn encode(&self) -> [u8; ENCODED_KEY_LEN] {
        let mut bytes = [0u8; ENCODED_KEY_LEN];
        bytes[0] = self.kind.as_byte();
        bytes[1] = SEPARATOR;
        bytes[2..18].copy_from_slice(self.key.as_bytes());
        bytes[18] = u8::from(self.preview);
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the length, separator, kind or preview byte is wrong.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ENCODED_KEY_LEN || bytes[1] != SEPARATOR {
            return None;
        }
        let kind = EntityKind::from_byte(bytes[0])?;
        let key = Uuid::from_slice(&bytes[2..18]).ok()?;
        let preview = match bytes[18] {
            0 => false,
            1 => true,
            _ => return None,
        };
        Some(Self { kind, key, preview })
    }

    /// Prefix shared by every key of one entity kind.
    pub fn kind_prefix(kind: EntityKind) -> [u8; 2] {
        [kind.as_byte(), SEPARATOR]
    }
}

impl fmt::Display for NodeCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = if self.preview { "preview" } else { "published" };
        write!(f, "{}:{}:{}", self.kind, self.key, view)
    }
}
