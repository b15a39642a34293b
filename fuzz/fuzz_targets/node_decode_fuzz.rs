//! Fuzz test for the distributed-tier node decoder.
//!
//! Arbitrary bytes must yield a node or `None`. Decoding a returned node's
//! states must not panic either.
//!
//! Run with: cargo +nightly fuzz run node_decode_fuzz -- -max_total_time=60

#![no_main]

use folio_cache::{CacheValueSerializer, HybridCacheSerializer, InternPool};
use folio_core::CacheSettings;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let serializer = HybridCacheSerializer::from_settings(&CacheSettings::default(), InternPool::shared());
    if let Some(node) = serializer.deserialize(data) {
        let _ = node.data_model(true);
        let _ = node.data_model(false);
    }
});
