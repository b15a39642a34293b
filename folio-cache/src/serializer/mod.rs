//! Serializer strategies for content cache data models.
//!
//! Two implementations share [`ContentCacheDataSerializer`]: tagged binary
//! ([`BinaryContentSerializer`]) and JSON text ([`JsonContentSerializer`]).
//! [`SerializerFactory`] picks one per entity type from settings.

pub mod binary;
pub mod compression;
pub mod factory;
pub mod json;

pub use binary::BinaryContentSerializer;
pub use compression::{EditorPropertyCompression, NoPropertyCompression, PropertyCacheCompression};
pub use factory::SerializerFactory;
pub use json::JsonContentSerializer;

use crate::model::ContentCacheDataModel;
use folio_core::{CodecError, ContentSource, PayloadChannel, SerializerKind};
use std::fmt;

/// Output of a serializer: exactly one channel is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl SerializedPayload {
    pub fn channel(&self) -> PayloadChannel {
        match self {
            SerializedPayload::Text(_) => PayloadChannel::Text,
            SerializedPayload::Binary(_) => PayloadChannel::Binary,
        }
    }

    pub fn as_payload_ref(&self) -> PayloadRef<'_> {
        match self {
            SerializedPayload::Text(text) => PayloadRef::Text(text),
            SerializedPayload::Binary(bytes) => PayloadRef::Binary(bytes),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SerializedPayload::Text(text) => text.len(),
            SerializedPayload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed input to a deserializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRef<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl<'a> PayloadRef<'a> {
    /// From a stored row's text and byte columns. Bytes win when both are
    /// set; `None` when neither is.
    pub fn from_columns(text: Option<&'a str>, bytes: Option<&'a [u8]>) -> Option<Self> {
        match (bytes, text) {
            (Some(bytes), _) => Some(PayloadRef::Binary(bytes)),
            (None, Some(text)) => Some(PayloadRef::Text(text)),
            (None, None) => None,
        }
    }

    pub fn channel(&self) -> PayloadChannel {
        match self {
            PayloadRef::Text(_) => PayloadChannel::Text,
            PayloadRef::Binary(_) => PayloadChannel::Binary,
        }
    }
}

/// Reads and writes data models for one wire format.
pub trait ContentCacheDataSerializer: Send + Sync + fmt::Debug {
    fn kind(&self) -> SerializerKind;

    /// Encode a model. Encode failures are returned, never swallowed.
    fn serialize(
        &self,
        content: &dyn ContentSource,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedPayload, CodecError>;

    /// Decode a model, reporting every failure.
    fn try_deserialize(
        &self,
        content: &dyn ContentSource,
        payload: PayloadRef<'_>,
        published: bool,
    ) -> Result<ContentCacheDataModel, CodecError>;

    /// Decode a model. Corrupt or oversized payloads are logged and yield
    /// `Ok(None)`; a channel mismatch is a wiring bug and is returned.
    fn deserialize(
        &self,
        content: &dyn ContentSource,
        payload: PayloadRef<'_>,
        published: bool,
    ) -> Result<Option<ContentCacheDataModel>, CodecError> {
        match self.try_deserialize(content, payload, published) {
            Ok(model) => Ok(Some(model)),
            Err(e) if e.is_recoverable() => {
                tracing::error!(
                    error = %e,
                    serializer = ?self.kind(),
                    node_id = content.id(),
                    node_key = %content.key(),
                    published,
                    "Failed to deserialize content cache data, treating as missing"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Error for a serializer handed the channel it does not read.
pub(crate) fn channel_mismatch(serializer: &'static str, kind: SerializerKind, got: PayloadChannel) -> CodecError {
    CodecError::ConfigurationMismatch {
        serializer,
        expected: kind.channel(),
        got,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContentDataBuilder;
    use crate::envelope::EnvelopeOptions;
    use crate::intern::InternPool;
    use folio_test_utils::generators;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_from_columns_prefers_bytes() {
        let bytes = [1u8, 2, 3];
        assert_eq!(
            PayloadRef::from_columns(Some("{}"), Some(&bytes)),
            Some(PayloadRef::Binary(&bytes))
        );
        assert_eq!(
            PayloadRef::from_columns(Some("{}"), None),
            Some(PayloadRef::Text("{}"))
        );
        assert_eq!(PayloadRef::from_columns(None, None), None);
    }

    #[test]
    fn test_payload_channel() {
        let text = SerializedPayload::Text("{}".into());
        assert_eq!(text.channel(), PayloadChannel::Text);
        assert_eq!(text.as_payload_ref().channel(), PayloadChannel::Text);
        let binary = SerializedPayload::Binary(vec![0; 4]);
        assert_eq!(binary.channel(), PayloadChannel::Binary);
        assert_eq!(binary.len(), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_both_codecs_preserve_models(snapshot in generators::arb_content_snapshot()) {
            let pool = InternPool::shared();
            let builder = ContentDataBuilder::new(pool.clone());
            let strategies: [Arc<dyn ContentCacheDataSerializer>; 2] = [
                Arc::new(BinaryContentSerializer::new(pool.clone(), EnvelopeOptions::default())),
                Arc::new(JsonContentSerializer::new(pool)),
            ];

            for published in [false, true] {
                let Some(model) = builder.build(&snapshot, published).expect("build should succeed") else {
                    continue;
                };
                for strategy in &strategies {
                    let payload = strategy
                        .serialize(&snapshot, &model, published)
                        .expect("encode should succeed");
                    prop_assert_eq!(payload.channel(), strategy.kind().channel());
                    let decoded = strategy
                        .try_deserialize(&snapshot, payload.as_payload_ref(), published)
                        .expect("decode should succeed");
                    prop_assert_eq!(&decoded, &model);
                }
            }
        }
    }
}
