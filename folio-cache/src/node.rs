//! Cache-resident content node with lazily decoded state payloads.

use crate::builder::ContentDataBuilder;
use crate::model::ContentCacheDataModel;
use crate::serializer::{ContentCacheDataSerializer, SerializedPayload};
use folio_core::{
    CodecError, ContentSnapshot, ContentTypeId, EntityKind, NodeId, NodeIdentity, NodeKey,
    StateSnapshot, Timestamp, UserId,
};
use std::sync::{Arc, OnceLock};

/// Identity and tree metadata shared by both states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub id: NodeId,
    pub key: NodeKey,
    pub kind: EntityKind,
    pub content_type_id: ContentTypeId,
    pub sort_order: i32,
    pub create_date: Timestamp,
    pub creator_id: UserId,
}

impl NodeHeader {
    pub fn from_snapshot(snapshot: &ContentSnapshot) -> Self {
        Self {
            id: snapshot.id,
            key: snapshot.key,
            kind: snapshot.kind,
            content_type_id: snapshot.content_type.id,
            sort_order: snapshot.sort_order,
            create_date: snapshot.create_date,
            creator_id: snapshot.creator_id,
        }
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            id: self.id,
            key: self.key,
            kind: self.kind,
            content_type_id: self.content_type_id,
        }
    }
}

/// Version metadata of one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMetadata {
    pub name: String,
    pub version_id: i32,
    pub version_date: Timestamp,
    pub writer_id: UserId,
    pub template_id: Option<i32>,
}

impl From<&StateSnapshot> for StateMetadata {
    fn from(state: &StateSnapshot) -> Self {
        Self {
            name: state.name.clone(),
            version_id: state.version_id,
            version_date: state.version_date,
            writer_id: state.writer_id,
            template_id: state.template_id,
        }
    }
}

/// One state as stored: metadata plus the still-encoded data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub metadata: StateMetadata,
    pub payload: SerializedPayload,
}

/// Result of resolving a state's data model.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    /// The state has no payload, or its payload could not be read.
    Missing,
    /// The decoded model. It may hold zero properties.
    Present(Arc<ContentCacheDataModel>),
}

impl NodeData {
    pub fn model(&self) -> Option<&Arc<ContentCacheDataModel>> {
        match self {
            NodeData::Missing => None,
            NodeData::Present(model) => Some(model),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, NodeData::Missing)
    }
}

#[derive(Debug, Default)]
struct StateSlot {
    stored: Option<StoredState>,
    decoded: OnceLock<Result<NodeData, CodecError>>,
}

impl StateSlot {
    fn new(stored: Option<StoredState>) -> Self {
        Self {
            stored,
            decoded: OnceLock::new(),
        }
    }
}

/// A cached content node.
///
/// Holds the encoded payload of its draft and published states and decodes
/// each one at most once, on first request. Nodes are replaced wholesale,
/// never patched.
#[derive(Debug)]
pub struct ContentCacheNode {
    header: NodeHeader,
    draft: StateSlot,
    published: StateSlot,
    serializer: Arc<dyn ContentCacheDataSerializer>,
}

impl ContentCacheNode {
    pub fn new(
        header: NodeHeader,
        draft: Option<StoredState>,
        published: Option<StoredState>,
        serializer: Arc<dyn ContentCacheDataSerializer>,
    ) -> Self {
        Self {
            header,
            draft: StateSlot::new(draft),
            published: StateSlot::new(published),
            serializer,
        }
    }

    /// Encode every state present in `snapshot` with `serializer`.
    pub fn from_snapshot(
        snapshot: &ContentSnapshot,
        builder: &ContentDataBuilder,
        serializer: Arc<dyn ContentCacheDataSerializer>,
    ) -> Result<Self, CodecError> {
        let encode = |published: bool| -> Result<Option<StoredState>, CodecError> {
            let (Some(state), Some(model)) =
                (snapshot.state(published), builder.build(snapshot, published)?)
            else {
                return Ok(None);
            };
            let payload = serializer.serialize(snapshot, &model, published)?;
            Ok(Some(StoredState {
                metadata: StateMetadata::from(state),
                payload,
            }))
        };
        let draft = encode(false)?;
        let published = encode(true)?;
        Ok(Self::new(
            NodeHeader::from_snapshot(snapshot),
            draft,
            published,
            serializer,
        ))
    }

    /// Same node without its draft state, for the public cache.
    pub fn without_draft(self) -> Self {
        Self {
            draft: StateSlot::default(),
            ..self
        }
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn id(&self) -> NodeId {
        self.header.id
    }

    pub fn key(&self) -> NodeKey {
        self.header.key
    }

    pub fn kind(&self) -> EntityKind {
        self.header.kind
    }

    pub fn content_type_id(&self) -> ContentTypeId {
        self.header.content_type_id
    }

    pub fn is_published(&self) -> bool {
        self.published.stored.is_some()
    }

    /// Whether a draft distinct from the published state exists.
    pub fn is_draft(&self) -> bool {
        self.draft.stored.is_some()
    }

    pub fn state(&self, published: bool) -> Option<&StoredState> {
        self.slot(published).stored.as_ref()
    }

    pub fn metadata(&self, published: bool) -> Option<&StateMetadata> {
        self.state(published).map(|s| &s.metadata)
    }

    pub fn serializer(&self) -> &Arc<dyn ContentCacheDataSerializer> {
        &self.serializer
    }

    /// Whether the state has already been decoded.
    pub fn is_decoded(&self, published: bool) -> bool {
        self.slot(published).decoded.get().is_some()
    }

    /// Data model of the requested state, decoded on first call.
    ///
    /// Absent and unreadable payloads resolve to [`NodeData::Missing`]. A
    /// payload the node's serializer cannot read by channel is an error.
    pub fn data_model(&self, published: bool) -> Result<NodeData, CodecError> {
        let slot = self.slot(published);
        slot.decoded
            .get_or_init(|| self.decode(slot, published))
            .clone()
    }

    fn decode(&self, slot: &StateSlot, published: bool) -> Result<NodeData, CodecError> {
        let Some(stored) = &slot.stored else {
            tracing::warn!(
                node_key = %self.header.key,
                published,
                "Requested state has no payload"
            );
            return Ok(NodeData::Missing);
        };
        let identity = self.header.identity();
        let model = self
            .serializer
            .deserialize(&identity, stored.payload.as_payload_ref(), published)?;
        Ok(match model {
            Some(model) => NodeData::Present(Arc::new(model)),
            None => NodeData::Missing,
        })
    }

    fn slot(&self, published: bool) -> &StateSlot {
        if published {
            &self.published
        } else {
            &self.draft
        }
    }
}
