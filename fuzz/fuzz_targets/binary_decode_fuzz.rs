//! Fuzz test for the binary and JSON data model decoders.
//!
//! Arbitrary bytes must decode to a model or a codec error, never panic or
//! allocate past the configured payload limit.
//!
//! Run with: cargo +nightly fuzz run binary_decode_fuzz -- -max_total_time=60

#![no_main]

use folio_cache::{
    BinaryContentSerializer, ContentCacheDataSerializer, EnvelopeOptions, InternPool,
    JsonContentSerializer, PayloadRef,
};
use folio_core::{EntityKind, NodeIdentity};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let identity = NodeIdentity {
        id: 1,
        key: Default::default(),
        kind: EntityKind::Document,
        content_type_id: 1,
    };
    let pool = InternPool::shared();

    let binary = BinaryContentSerializer::new(pool.clone(), EnvelopeOptions::default());
    if let Ok(model) = binary.try_deserialize(&identity, PayloadRef::Binary(data), true) {
        // Compressed values must inflate or fail cleanly.
        if let Some(properties) = &model.property_data {
            for entries in properties.values() {
                for value in entries.iter().filter_map(|e| e.value.as_ref()) {
                    let _ = value.text();
                }
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let json = JsonContentSerializer::new(pool);
        let _ = json.try_deserialize(&identity, PayloadRef::Text(text), true);
    }
});
