//! Case-insensitive dictionary with interned keys, and its codec.
//!
//! Keys compare ordinally after lower-casing, so `"Title"`, `"title"` and
//! `"TITLE"` address the same entry. Lookups by `&str` do not allocate.
//! Decoded keys come from the shared [`Interner`](crate::intern::Interner).

use crate::intern::Interner;
use crate::wire::{self, preallocation, DecodeContext, Wire, WireDecode, WireEncode, WireFormat};
use folio_core::{eq_ignore_case, CodecError};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// CASE-INSENSITIVE KEYS
// ============================================================================

fn folded_hash<H: Hasher>(s: &str, state: &mut H) {
    for c in s.chars().flat_map(char::to_lowercase) {
        state.write_u32(c as u32);
    }
    state.write_u8(0xFF);
}

/// Dictionary key: the original spelling, compared case-insensitively.
#[derive(Clone)]
pub struct CiKey(Arc<str>);

impl CiKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }
}

impl fmt::Debug for CiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl PartialEq for CiKey {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.0, &other.0)
    }
}

impl Eq for CiKey {}

impl Hash for CiKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        folded_hash(&self.0, state);
    }
}

/// Borrowed key view used for allocation-free lookups.
pub trait CaseFold {
    fn folded_source(&self) -> &str;
}

impl CaseFold for CiKey {
    fn folded_source(&self) -> &str {
        &self.0
    }
}

impl CaseFold for &str {
    fn folded_source(&self) -> &str {
        self
    }
}

impl PartialEq for dyn CaseFold + '_ {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(self.folded_source(), other.folded_source())
    }
}

impl Eq for dyn CaseFold + '_ {}

impl Hash for dyn CaseFold + '_ {
    fn hash<H: Hasher>(&self, state: &mut H) {
        folded_hash(self.folded_source(), state);
    }
}

impl<'a> Borrow<dyn CaseFold + 'a> for CiKey {
    fn borrow(&self) -> &(dyn CaseFold + 'a) {
        self
    }
}

// ============================================================================
// MAP
// ============================================================================

/// Map keyed case-insensitively by string.
///
/// Iteration order is unspecified.
#[derive(Clone, PartialEq)]
pub struct CaseInsensitiveMap<V> {
    entries: HashMap<CiKey, V>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Insert under `key`. An existing entry with a differently cased key
    /// keeps its original spelling and gets the new value.
    pub fn insert(&mut self, key: Arc<str>, value: V) -> Option<V> {
        match self.entries.entry(CiKey(key)) {
            hash_map::Entry::Occupied(mut slot) => Some(std::mem::replace(slot.get_mut(), value)),
            hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&key as &dyn CaseFold)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(&key as &dyn CaseFold)
    }

    /// Stored key and value. The key is the pooled instance.
    pub fn get_key_value(&self, key: &str) -> Option<(&Arc<str>, &V)> {
        self.entries
            .get_key_value(&key as &dyn CaseFold)
            .map(|(k, v)| (&k.0, v))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(&key as &dyn CaseFold)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.entries.keys().map(|k| &k.0)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &V)> {
        self.entries.iter().map(|(k, v)| (&k.0, v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }
}

impl<V: fmt::Debug> fmt::Debug for CaseInsensitiveMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<V> FromIterator<(Arc<str>, V)> for CaseInsensitiveMap<V> {
    fn from_iter<I: IntoIterator<Item = (Arc<str>, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ============================================================================
// WIRE
// ============================================================================

impl<V: WireEncode> WireEncode for CaseInsensitiveMap<V> {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(&**key, &Wire::new(value, format))?;
        }
        map.end()
    }
}

impl<V: WireDecode> WireDecode for CaseInsensitiveMap<V> {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        struct MapVisitor<'a, V> {
            ctx: DecodeContext<'a>,
            marker: PhantomData<fn() -> V>,
        }

        impl<'de, V: WireDecode> Visitor<'de> for MapVisitor<'_, V> {
            type Value = CaseInsensitiveMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string-keyed map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = CaseInsensitiveMap::with_capacity(preallocation(access.size_hint()));
                while let Some(key) = access.next_key_seed(self.ctx.interned())? {
                    let value = access.next_value_seed(self.ctx.seed::<V>())?;
                    if map.insert(Arc::clone(&key), value).is_some() {
                        return Err(de::Error::custom(format!("duplicate dictionary key {key:?}")));
                    }
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor {
            ctx,
            marker: PhantomData,
        })
    }
}

// ============================================================================
// STANDALONE CODEC
// ============================================================================

/// Encodes and decodes a single dictionary in either wire format.
///
/// Tagged dictionaries are MessagePack; named dictionaries are JSON text.
#[derive(Debug, Clone)]
pub struct DictionaryCodec {
    interner: Arc<dyn Interner>,
    format: WireFormat,
}

impl DictionaryCodec {
    pub fn new(interner: Arc<dyn Interner>, format: WireFormat) -> Self {
        Self { interner, format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn encode<V: WireEncode>(&self, map: &CaseInsensitiveMap<V>) -> Result<Vec<u8>, CodecError> {
        let wire = Wire::new(map, self.format);
        match self.format {
            WireFormat::Tagged => rmp_serde::to_vec(&wire).map_err(CodecError::fault),
            WireFormat::Named => serde_json::to_vec(&wire).map_err(CodecError::fault),
        }
    }

    pub fn decode<V: WireDecode>(&self, bytes: &[u8]) -> Result<CaseInsensitiveMap<V>, CodecError> {
        let ctx = DecodeContext::new(self.interner.as_ref());
        match self.format {
            WireFormat::Tagged => {
                wire::decode_tagged(bytes, |de| CaseInsensitiveMap::decode(de, ctx))
            }
            WireFormat::Named => {
                let mut de = serde_json::Deserializer::from_slice(bytes);
                let map = CaseInsensitiveMap::decode(&mut de, ctx).map_err(CodecError::corrupt)?;
                de.end().map_err(CodecError::corrupt)?;
                Ok(map)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::InternPool;
    use crate::model::CultureVariation;
    use chrono::{TimeZone, Utc};

    fn culture(name: &str) -> CultureVariation {
        CultureVariation {
            name: Some(name.to_string()),
            url_segment: Some(name.to_lowercase()),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().expect("valid date"),
            is_draft: false,
        }
    }

    fn sample(pool: &InternPool) -> CaseInsensitiveMap<CultureVariation> {
        let mut map = CaseInsensitiveMap::new();
        map.insert(pool.intern("en-US"), culture("Home"));
        map.insert(pool.intern("da-DK"), culture("Hjem"));
        map
    }

    #[test]
    fn test_lookup_ignores_case() {
        let pool = InternPool::new();
        let map = sample(&pool);
        assert!(map.get("EN-us").is_some());
        assert!(map.get("en-us").is_some());
        assert!(map.get("de-DE").is_none());
        let (key, _) = map.get_key_value("DA-dk").expect("key should resolve");
        assert_eq!(&**key, "da-DK");
    }

    #[test]
    fn test_lookup_folds_non_ascii() {
        let mut map = CaseInsensitiveMap::new();
        map.insert(Arc::from("Überschrift"), 1);
        assert_eq!(map.get("überschrift"), Some(&1));
        assert_eq!(map.get("ÜBERSCHRIFT"), Some(&1));
    }

    #[test]
    fn test_insert_keeps_first_spelling() {
        let mut map = CaseInsensitiveMap::new();
        assert_eq!(map.insert(Arc::from("Title"), 1), None);
        assert_eq!(map.insert(Arc::from("TITLE"), 2), Some(1));
        assert_eq!(map.len(), 1);
        let (key, value) = map.get_key_value("title").expect("entry should exist");
        assert_eq!((&**key, *value), ("Title", 2));
    }

    #[test]
    fn test_codec_roundtrip_both_formats() {
        let pool = InternPool::shared();
        let map = sample(&pool);
        for format in [WireFormat::Tagged, WireFormat::Named] {
            let codec = DictionaryCodec::new(pool.clone(), format);
            let bytes = codec.encode(&map).expect("encode should succeed");
            let decoded: CaseInsensitiveMap<CultureVariation> =
                codec.decode(&bytes).expect("decode should succeed");
            assert_eq!(decoded, map);
            assert_eq!(decoded.len(), 2);
        }
    }

    #[test]
    fn test_decoded_keys_are_interned() {
        let pool = InternPool::shared();
        let codec = DictionaryCodec::new(pool.clone(), WireFormat::Tagged);
        let bytes = codec
            .encode(&sample(&InternPool::new()))
            .expect("encode should succeed");

        let first: CaseInsensitiveMap<CultureVariation> =
            codec.decode(&bytes).expect("decode should succeed");
        let second: CaseInsensitiveMap<CultureVariation> =
            codec.decode(&bytes).expect("decode should succeed");

        let (a, _) = first.get_key_value("en-US").expect("key should exist");
        let (b, _) = second.get_key_value("en-US").expect("key should exist");
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_empty_map_roundtrips_empty() {
        let pool = InternPool::shared();
        let codec = DictionaryCodec::new(pool, WireFormat::Named);
        let empty: CaseInsensitiveMap<CultureVariation> = CaseInsensitiveMap::new();
        let bytes = codec.encode(&empty).expect("encode should succeed");
        assert_eq!(bytes, b"{}");
        let decoded: CaseInsensitiveMap<CultureVariation> =
            codec.decode(&bytes).expect("decode should succeed");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_tagged_decode_rejects_trailing_bytes() {
        let pool = InternPool::shared();
        let map = sample(&pool);
        let codec = DictionaryCodec::new(pool, WireFormat::Tagged);
        let mut bytes = codec.encode(&map).expect("encode should succeed");
        bytes.push(0x00);

        let result: Result<CaseInsensitiveMap<CultureVariation>, _> = codec.decode(&bytes);
        assert!(matches!(result, Err(CodecError::CorruptPayload { .. })));
    }

    #[test]
    fn test_decode_rejects_case_duplicate_keys() {
        let pool = InternPool::shared();
        let codec = DictionaryCodec::new(pool, WireFormat::Named);
        let json = br#"{"en-US":{"dt":"2024-05-01T08:00:00Z"},"EN-us":{"dt":"2024-05-01T08:00:00Z"}}"#;
        let result: Result<CaseInsensitiveMap<CultureVariation>, _> = codec.decode(json);
        assert!(matches!(result, Err(CodecError::CorruptPayload { .. })));
    }
}
