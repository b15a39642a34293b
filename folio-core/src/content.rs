//! Read-only content input handed to the cache by the content services.
//!
//! The cache never mutates these values. `ContentSource` is the narrow view
//! the serializers need; `ContentSnapshot` is the full picture used when a
//! node is (re)built.

use crate::{
    eq_ignore_case, ContentTypeId, ContentVariation, EntityKind, NodeId, NodeKey, Timestamp,
    UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The part of a content entity a serializer may consult.
pub trait ContentSource: Send + Sync {
    fn id(&self) -> NodeId;

    fn key(&self) -> NodeKey;

    fn entity_kind(&self) -> EntityKind;

    fn content_type_id(&self) -> ContentTypeId;

    /// Editor alias of a property, matched case-insensitively.
    fn property_editor_alias(&self, property_alias: &str) -> Option<&str>;
}

/// Property type of a content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTypeRef {
    pub alias: String,
    pub editor_alias: String,
    pub variation: ContentVariation,
}

/// Content type shape, shared by every node of that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRef {
    pub id: ContentTypeId,
    pub alias: String,
    pub variation: ContentVariation,
    pub property_types: Vec<PropertyTypeRef>,
}

impl ContentTypeRef {
    pub fn property_type(&self, alias: &str) -> Option<&PropertyTypeRef> {
        self.property_types
            .iter()
            .find(|p| eq_ignore_case(&p.alias, alias))
    }
}

/// One stored value of a property. `None` culture/segment means invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValueSnapshot {
    pub culture: Option<String>,
    pub segment: Option<String>,
    pub edited_value: Option<Value>,
    pub published_value: Option<Value>,
}

impl PropertyValueSnapshot {
    pub fn invariant(edited: Option<Value>, published: Option<Value>) -> Self {
        Self {
            culture: None,
            segment: None,
            edited_value: edited,
            published_value: published,
        }
    }

    pub fn for_culture(culture: &str, edited: Option<Value>, published: Option<Value>) -> Self {
        Self {
            culture: Some(culture.to_string()),
            segment: None,
            edited_value: edited,
            published_value: published,
        }
    }

    /// Value for the requested state.
    pub fn value(&self, published: bool) -> Option<&Value> {
        if published {
            self.published_value.as_ref()
        } else {
            self.edited_value.as_ref()
        }
    }
}

/// All values of one property, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub alias: String,
    pub values: Vec<PropertyValueSnapshot>,
}

/// Per-culture metadata of one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CultureSnapshot {
    pub culture: String,
    pub name: String,
    pub url_segment: Option<String>,
    pub update_date: Timestamp,
    /// The culture has unpublished edits.
    pub edited: bool,
}

/// Version metadata of one state (draft or published).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub name: String,
    pub version_id: i32,
    pub version_date: Timestamp,
    pub writer_id: UserId,
    pub template_id: Option<i32>,
    pub cultures: Vec<CultureSnapshot>,
    pub url_segment: Option<String>,
}

/// Full read-only snapshot of a content entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSnapshot {
    pub id: NodeId,
    pub key: NodeKey,
    pub kind: EntityKind,
    pub content_type: Arc<ContentTypeRef>,
    pub sort_order: i32,
    pub create_date: Timestamp,
    pub creator_id: UserId,
    pub properties: Vec<PropertySnapshot>,
    /// Present when the entity has a draft version distinct from published.
    pub draft: Option<StateSnapshot>,
    /// Present when the entity is published.
    pub published: Option<StateSnapshot>,
}

impl ContentSnapshot {
    /// Metadata for the requested state.
    pub fn state(&self, published: bool) -> Option<&StateSnapshot> {
        if published {
            self.published.as_ref()
        } else {
            self.draft.as_ref()
        }
    }
}

impl ContentSource for ContentSnapshot {
    fn id(&self) -> NodeId {
        self.id
    }

    fn key(&self) -> NodeKey {
        self.key
    }

    fn entity_kind(&self) -> EntityKind {
        self.kind
    }

    fn content_type_id(&self) -> ContentTypeId {
        self.content_type.id
    }

    fn property_editor_alias(&self, property_alias: &str) -> Option<&str> {
        self.content_type
            .property_type(property_alias)
            .map(|p| p.editor_alias.as_str())
    }
}

/// Minimal source used when only identity is known, e.g. when a cached node
/// is re-encoded without its full entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub key: NodeKey,
    pub kind: EntityKind,
    pub content_type_id: ContentTypeId,
}

impl ContentSource for NodeIdentity {
    fn id(&self) -> NodeId {
        self.id
    }

    fn key(&self) -> NodeKey {
        self.key
    }

    fn entity_kind(&self) -> EntityKind {
        self.kind
    }

    fn content_type_id(&self) -> ContentTypeId {
        self.content_type_id
    }

    fn property_editor_alias(&self, _property_alias: &str) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn article_type() -> ContentTypeRef {
        ContentTypeRef {
            id: 1050,
            alias: "article".to_string(),
            variation: ContentVariation::CULTURE,
            property_types: vec![PropertyTypeRef {
                alias: "bodyText".to_string(),
                editor_alias: "Umbraco.RichText".to_string(),
                variation: ContentVariation::CULTURE,
            }],
        }
    }

    #[test]
    fn test_property_editor_lookup_is_case_insensitive() {
        let snapshot = ContentSnapshot {
            id: 1,
            key: Uuid::nil(),
            kind: EntityKind::Document,
            content_type: Arc::new(article_type()),
            sort_order: 0,
            create_date: chrono::Utc::now(),
            creator_id: -1,
            properties: vec![],
            draft: None,
            published: None,
        };

        assert_eq!(
            snapshot.property_editor_alias("BODYTEXT"),
            Some("Umbraco.RichText")
        );
        assert_eq!(snapshot.property_editor_alias("missing"), None);
        assert_eq!(snapshot.content_type_id(), 1050);
        assert!(snapshot.state(true).is_none());
    }

    #[test]
    fn test_value_by_state() {
        let value = PropertyValueSnapshot::invariant(
            Some(Value::String("draft".into())),
            Some(Value::String("live".into())),
        );
        assert_eq!(value.value(false), Some(&Value::String("draft".into())));
        assert_eq!(value.value(true), Some(&Value::String("live".into())));
    }

    #[test]
    fn test_variation_serde_roundtrip() {
        let json = serde_json::to_string(&ContentVariation::CULTURE).unwrap();
        assert_eq!(json, "1");
        let back: ContentVariation = serde_json::from_str("3").unwrap();
        assert!(back.varies_by_culture() && back.varies_by_segment());
        assert!(serde_json::from_str::<ContentVariation>("8").is_err());
    }
}
