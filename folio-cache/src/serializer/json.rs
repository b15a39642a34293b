//! JSON text serializer.

use super::{channel_mismatch, ContentCacheDataSerializer, PayloadRef, SerializedPayload};
use crate::intern::Interner;
use crate::model::ContentCacheDataModel;
use crate::wire::{DecodeContext, Wire, WireDecode, WireFormat};
use folio_core::{CodecError, ContentSource, PayloadChannel, SerializerKind};
use std::sync::Arc;

/// Text strategy: UTF-8 JSON with short field names, nulls omitted.
#[derive(Debug, Clone)]
pub struct JsonContentSerializer {
    interner: Arc<dyn Interner>,
}

impl JsonContentSerializer {
    pub fn new(interner: Arc<dyn Interner>) -> Self {
        Self { interner }
    }
}

impl ContentCacheDataSerializer for JsonContentSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::Json
    }

    fn serialize(
        &self,
        _content: &dyn ContentSource,
        model: &ContentCacheDataModel,
        _published: bool,
    ) -> Result<SerializedPayload, CodecError> {
        serde_json::to_string(&Wire::new(model, WireFormat::Named))
            .map(SerializedPayload::Text)
            .map_err(CodecError::fault)
    }

    fn try_deserialize(
        &self,
        _content: &dyn ContentSource,
        payload: PayloadRef<'_>,
        _published: bool,
    ) -> Result<ContentCacheDataModel, CodecError> {
        let PayloadRef::Text(text) = payload else {
            return Err(channel_mismatch("json", self.kind(), PayloadChannel::Binary));
        };
        let mut de = serde_json::Deserializer::from_str(text);
        let model = ContentCacheDataModel::decode(&mut de, DecodeContext::new(self.interner.as_ref()))
            .map_err(CodecError::corrupt)?;
        de.end().map_err(CodecError::corrupt)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContentDataBuilder;
    use crate::dictionary::CaseInsensitiveMap;
    use crate::intern::InternPool;
    use folio_test_utils::fixtures;

    #[test]
    fn test_roundtrip_multi_culture() {
        let pool = InternPool::shared();
        let snapshot = fixtures::multi_culture_article();
        let model = ContentDataBuilder::new(pool.clone())
            .build(&snapshot, false)
            .expect("build should succeed")
            .expect("draft state exists");

        let codec = JsonContentSerializer::new(pool);
        let payload = codec.serialize(&snapshot, &model, false).expect("serialize should succeed");
        let SerializedPayload::Text(text) = &payload else {
            panic!("json serializer must produce text");
        };
        assert!(text.starts_with('{'));
        assert!(!text.contains("null"));

        let back = codec
            .deserialize(&snapshot, payload.as_payload_ref(), false)
            .expect("no configuration error")
            .expect("payload should decode");
        assert_eq!(back, model);
    }

    #[test]
    fn test_empty_invariant_node() {
        let pool = InternPool::shared();
        let snapshot = fixtures::empty_invariant_document();
        let model = ContentDataBuilder::new(pool.clone())
            .build(&snapshot, true)
            .expect("build should succeed")
            .expect("published state exists");
        let codec = JsonContentSerializer::new(pool);

        let payload = codec.serialize(&snapshot, &model, true).expect("serialize should succeed");
        assert_eq!(payload, SerializedPayload::Text("{}".into()));

        let back = codec
            .try_deserialize(&snapshot, payload.as_payload_ref(), true)
            .expect("payload should decode");
        assert!(back.property_data.is_none());
        assert!(back.culture_data.is_none());
        assert!(back.url_segment.is_none());
    }

    #[test]
    fn test_present_empty_culture_data_differs_from_absent() {
        let pool = InternPool::shared();
        let codec = JsonContentSerializer::new(pool);
        let snapshot = fixtures::empty_invariant_document();

        let present = ContentCacheDataModel {
            culture_data: Some(CaseInsensitiveMap::new()),
            ..Default::default()
        };
        let absent = ContentCacheDataModel::default();

        let present_back = codec
            .try_deserialize(
                &snapshot,
                codec
                    .serialize(&snapshot, &present, true)
                    .expect("serialize should succeed")
                    .as_payload_ref(),
                true,
            )
            .expect("payload should decode");
        let absent_back = codec
            .try_deserialize(
                &snapshot,
                codec
                    .serialize(&snapshot, &absent, true)
                    .expect("serialize should succeed")
                    .as_payload_ref(),
                true,
            )
            .expect("payload should decode");

        assert_eq!(present_back.culture_data.map(|c| c.len()), Some(0));
        assert!(absent_back.culture_data.is_none());
    }

    #[test]
    fn test_binary_channel_is_configuration_mismatch() {
        let codec = JsonContentSerializer::new(InternPool::shared());
        let snapshot = fixtures::empty_invariant_document();
        let err = codec
            .deserialize(&snapshot, PayloadRef::Binary(&[1, 2, 3]), true)
            .expect_err("byte payload must be rejected");
        assert!(matches!(err, CodecError::ConfigurationMismatch { .. }));
    }

    #[test]
    fn test_malformed_text_yields_no_data() {
        let codec = JsonContentSerializer::new(InternPool::shared());
        let snapshot = fixtures::empty_invariant_document();
        for text in ["", "{", "[1,2]", r#"{"pd":{"a":[{"v":1}]}} trailing"#, r#"{"cd":{"en":{"dt":"soon"}}}"#] {
            let result = codec
                .deserialize(&snapshot, PayloadRef::Text(text), true)
                .expect("corruption is not a configuration error");
            assert!(result.is_none(), "{text:?} should be rejected");
        }
    }
}
