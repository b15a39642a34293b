//! Tagged MessagePack serializer with envelope compression.

use super::compression::{NoPropertyCompression, PropertyCacheCompression};
use super::{channel_mismatch, ContentCacheDataSerializer, PayloadRef, SerializedPayload};
use crate::envelope::{self, EnvelopeOptions, LazyText, PayloadKind};
use crate::intern::Interner;
use crate::model::{ContentCacheDataModel, RawValue};
use crate::wire::{self, DecodeContext, Wire, WireDecode, WireFormat};
use folio_core::{CodecError, ContentSource, PayloadChannel, SerializerKind};
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;

/// Binary strategy: integer-tagged MessagePack sealed in an LZ4 envelope.
#[derive(Debug, Clone)]
pub struct BinaryContentSerializer {
    interner: Arc<dyn Interner>,
    compression: Arc<dyn PropertyCacheCompression>,
    envelope: EnvelopeOptions,
}

impl BinaryContentSerializer {
    pub fn new(interner: Arc<dyn Interner>, envelope: EnvelopeOptions) -> Self {
        Self {
            interner,
            compression: Arc::new(NoPropertyCompression),
            envelope,
        }
    }

    pub fn with_compression(mut self, compression: Arc<dyn PropertyCacheCompression>) -> Self {
        self.compression = compression;
        self
    }

    /// Replace compressible text values with lazily inflated blocks.
    /// Borrows the model untouched when nothing qualifies.
    fn compress_properties<'m>(
        &self,
        content: &dyn ContentSource,
        model: &'m ContentCacheDataModel,
        published: bool,
    ) -> Cow<'m, ContentCacheDataModel> {
        let Some(data) = &model.property_data else {
            return Cow::Borrowed(model);
        };
        let min_len = self.compression.min_value_bytes();
        let qualifies = |alias: &str, value: &Option<RawValue>| {
            matches!(value, Some(RawValue::Text(text)) if text.len() >= min_len)
                && self.compression.is_compressed(content, alias, published)
        };
        let any = data
            .iter()
            .any(|(alias, entries)| entries.iter().any(|e| qualifies(&**alias, &e.value)));
        if !any {
            return Cow::Borrowed(model);
        }

        let mut owned = model.clone();
        if let Some(data) = owned.property_data.as_mut() {
            let aliases: Vec<Arc<str>> = data.keys().cloned().collect();
            for alias in aliases {
                let Some(entries) = data.get_mut(&alias) else {
                    continue;
                };
                for entry in entries.iter_mut() {
                    if qualifies(&*alias, &entry.value) {
                        if let Some(RawValue::Text(text)) = &entry.value {
                            entry.value = Some(RawValue::Compressed(LazyText::compress(text)));
                        }
                    }
                }
            }
        }
        Cow::Owned(owned)
    }

    pub(crate) fn encode_body(model: &ContentCacheDataModel) -> Result<Vec<u8>, CodecError> {
        let mut body = Vec::new();
        Wire::new(model, WireFormat::Tagged)
            .serialize(&mut rmp_serde::Serializer::new(&mut body))
            .map_err(CodecError::fault)?;
        Ok(body)
    }
}

impl ContentCacheDataSerializer for BinaryContentSerializer {
    fn kind(&self) -> SerializerKind {
        SerializerKind::MessagePack
    }

    fn serialize(
        &self,
        content: &dyn ContentSource,
        model: &ContentCacheDataModel,
        published: bool,
    ) -> Result<SerializedPayload, CodecError> {
        let model = self.compress_properties(content, model, published);
        let body = Self::encode_body(&model)?;
        let sealed = envelope::seal(PayloadKind::DataModel, &body, &self.envelope)?;
        Ok(SerializedPayload::Binary(sealed))
    }

    fn try_deserialize(
        &self,
        _content: &dyn ContentSource,
        payload: PayloadRef<'_>,
        _published: bool,
    ) -> Result<ContentCacheDataModel, CodecError> {
        let PayloadRef::Binary(bytes) = payload else {
            return Err(channel_mismatch("binary", self.kind(), PayloadChannel::Text));
        };
        let body = envelope::open(PayloadKind::DataModel, bytes, &self.envelope)?;
        let ctx = DecodeContext::new(self.interner.as_ref());
        wire::decode_tagged(&body, |de| ContentCacheDataModel::decode(de, ctx))
    }
}
