//! Format-aware serde plumbing shared by the binary and JSON codecs.
//!
//! Every cached type is written as a map. In [`WireFormat::Tagged`] the keys
//! are permanent integer tags; in [`WireFormat::Named`] they are short field
//! names. Decoding accepts either key form, skips unknown keys, and threads a
//! [`DecodeContext`] through a `DeserializeSeed` so keys, cultures and
//! segments are interned as they are read.

use crate::intern::Interner;
use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::{CodecError, Timestamp};
use serde::de::{self, DeserializeSeed, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Upper bound on capacity reserved from an untrusted length hint.
const MAX_PREALLOCATION: usize = 1024;

/// Key style of an encoded map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Integer field tags (binary codec, node shells).
    Tagged,
    /// Short field names (JSON codec).
    Named,
}

// ============================================================================
// FIELD KEYS
// ============================================================================

/// A field's permanent tag and its short name.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Field {
    pub tag: u8,
    pub name: &'static str,
}

impl Field {
    pub(crate) const fn new(tag: u8, name: &'static str) -> Self {
        Self { tag, name }
    }

    /// Serializable key for this field in `format`.
    pub(crate) fn key(self, format: WireFormat) -> FieldKey {
        FieldKey {
            field: self,
            format,
        }
    }
}

pub(crate) struct FieldKey {
    field: Field,
    format: WireFormat,
}

impl Serialize for FieldKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.format {
            WireFormat::Tagged => serializer.serialize_u8(self.field.tag),
            WireFormat::Named => serializer.serialize_str(self.field.name),
        }
    }
}

/// Resolves a map key against a field table. `None` means unknown.
pub(crate) struct FieldSeed(pub &'static [Field]);

impl<'de> DeserializeSeed<'de> for FieldSeed {
    type Value = Option<u8>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for FieldSeed {
    type Value = Option<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a field tag or field name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(self
            .0
            .iter()
            .find(|field| u64::from(field.tag) == v)
            .map(|field| field.tag))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        match u64::try_from(v) {
            Ok(v) => self.visit_u64(v),
            Err(_) => Ok(None),
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(self
            .0
            .iter()
            .find(|field| field.name == v)
            .map(|field| field.tag))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        match std::str::from_utf8(v) {
            Ok(s) => self.visit_str(s),
            Err(_) => Ok(None),
        }
    }
}

// ============================================================================
// ENCODE / DECODE TRAITS
// ============================================================================

/// A type with a format-dependent wire shape.
pub trait WireEncode {
    fn encode<S: Serializer>(&self, format: WireFormat, serializer: S)
        -> Result<S::Ok, S::Error>;
}

/// A type decoded from either wire shape, interning through `ctx`.
pub trait WireDecode: Sized {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error>;
}

/// `Serialize` adapter pairing a value with its wire format.
pub struct Wire<'a, T: ?Sized> {
    value: &'a T,
    format: WireFormat,
}

impl<'a, T: ?Sized> Wire<'a, T> {
    pub fn new(value: &'a T, format: WireFormat) -> Self {
        Self { value, format }
    }
}

impl<T: WireEncode + ?Sized> Serialize for Wire<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.encode(self.format, serializer)
    }
}

/// Decode-time services.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    interner: &'a dyn Interner,
}

impl<'a> DecodeContext<'a> {
    pub fn new(interner: &'a dyn Interner) -> Self {
        Self { interner }
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        self.interner.intern(s)
    }

    pub(crate) fn seed<T: WireDecode>(self) -> WireSeed<'a, T> {
        WireSeed {
            ctx: self,
            marker: PhantomData,
        }
    }

    pub(crate) fn interned(self) -> InternedStr<'a> {
        InternedStr(self)
    }
}

/// `DeserializeSeed` adapter for [`WireDecode`] types.
pub struct WireSeed<'a, T> {
    ctx: DecodeContext<'a>,
    marker: PhantomData<fn() -> T>,
}

impl<'de, T: WireDecode> DeserializeSeed<'de> for WireSeed<'_, T> {
    type Value = T;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<T, D::Error> {
        T::decode(deserializer, self.ctx)
    }
}

// ============================================================================
// SEQUENCES
// ============================================================================

impl<T: WireEncode> WireEncode for [T] {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for item in self {
            seq.serialize_element(&Wire::new(item, format))?;
        }
        seq.end()
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        self.as_slice().encode(format, serializer)
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        struct SeqVisitor<'a, T> {
            ctx: DecodeContext<'a>,
            marker: PhantomData<fn() -> T>,
        }

        impl<'de, T: WireDecode> Visitor<'de> for SeqVisitor<'_, T> {
            type Value = Vec<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<T>, A::Error> {
                let capacity = seq.size_hint().unwrap_or(0).min(MAX_PREALLOCATION);
                let mut items = Vec::with_capacity(capacity);
                while let Some(item) = seq.next_element_seed(self.ctx.seed::<T>())? {
                    items.push(item);
                }
                Ok(items)
            }
        }

        deserializer.deserialize_seq(SeqVisitor {
            ctx,
            marker: PhantomData,
        })
    }
}

pub(crate) fn preallocation(hint: Option<usize>) -> usize {
    hint.unwrap_or(0).min(MAX_PREALLOCATION)
}

/// MessagePack deserializer over the unread part of a body.
pub(crate) type TaggedDeserializer<'r, 'b> = rmp_serde::Deserializer<rmp_serde::decode::ReadReader<&'r mut &'b [u8]>>;

/// Run `decode` over a MessagePack body that must hold exactly one value.
pub(crate) fn decode_tagged<T, F>(body: &[u8], decode: F) -> Result<T, CodecError>
where
    F: for<'r, 'b> FnOnce(&mut TaggedDeserializer<'r, 'b>) -> Result<T, rmp_serde::decode::Error>,
{
    let mut rest = body;
    let value = decode(&mut rmp_serde::Deserializer::new(&mut rest)).map_err(CodecError::corrupt)?;
    if !rest.is_empty() {
        return Err(CodecError::corrupt(format_args!(
            "{} trailing bytes after body",
            rest.len()
        )));
    }
    Ok(value)
}

// ============================================================================
// SCALARS
// ============================================================================

/// Reads a string and returns the pooled instance.
pub(crate) struct InternedStr<'a>(DecodeContext<'a>);

impl<'de> DeserializeSeed<'de> for InternedStr<'_> {
    type Value = Arc<str>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Arc<str>, D::Error> {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for InternedStr<'_> {
    type Value = Arc<str>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Arc<str>, E> {
        Ok(self.0.intern(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Arc<str>, E> {
        std::str::from_utf8(v)
            .map(|s| self.0.intern(s))
            .map_err(|_| E::invalid_value(de::Unexpected::Bytes(v), &self))
    }
}

/// Timestamp written as epoch microseconds (tagged) or RFC 3339 (named).
pub(crate) struct WireTimestamp<'a>(pub &'a Timestamp, pub WireFormat);

impl Serialize for WireTimestamp<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.1 {
            WireFormat::Tagged => serializer.serialize_i64(self.0.timestamp_micros()),
            WireFormat::Named => {
                serializer.serialize_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// Accepts either timestamp representation.
pub(crate) struct TimestampValue(pub Timestamp);

impl<'de> Deserialize<'de> for TimestampValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampVisitor;

        impl<'de> Visitor<'de> for TimestampVisitor {
            type Value = TimestampValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("epoch microseconds or an RFC 3339 timestamp")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                DateTime::<Utc>::from_timestamp_micros(v)
                    .map(TimestampValue)
                    .ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                let v = i64::try_from(v)
                    .map_err(|_| E::custom(format!("timestamp out of range: {v}")))?;
                self.visit_i64(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                DateTime::parse_from_rfc3339(v)
                    .map(|dt| TimestampValue(dt.with_timezone(&Utc)))
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FIELDS: &[Field] = &[Field::new(0, "nm"), Field::new(1, "us")];

    #[test]
    fn test_field_seed_accepts_tags_and_names() {
        let mut de = serde_json::Deserializer::from_str("\"us\"");
        assert_eq!(FieldSeed(FIELDS).deserialize(&mut de).ok(), Some(Some(1)));

        let mut de = serde_json::Deserializer::from_str("0");
        assert_eq!(FieldSeed(FIELDS).deserialize(&mut de).ok(), Some(Some(0)));

        let mut de = serde_json::Deserializer::from_str("\"zz\"");
        assert_eq!(FieldSeed(FIELDS).deserialize(&mut de).ok(), Some(None));

        let mut de = serde_json::Deserializer::from_str("-4");
        assert_eq!(FieldSeed(FIELDS).deserialize(&mut de).ok(), Some(None));
    }

    #[test]
    fn test_timestamp_both_representations() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).single().expect("valid date");

        let named = serde_json::to_string(&WireTimestamp(&ts, WireFormat::Named))
            .expect("named timestamp should serialize");
        assert_eq!(named, "\"2024-03-01T12:30:00Z\"");
        let back: TimestampValue = serde_json::from_str(&named).expect("rfc3339 should parse");
        assert_eq!(back.0, ts);

        let tagged = serde_json::to_string(&WireTimestamp(&ts, WireFormat::Tagged))
            .expect("tagged timestamp should serialize");
        let back: TimestampValue = serde_json::from_str(&tagged).expect("micros should parse");
        assert_eq!(back.0, ts);
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(serde_json::from_str::<TimestampValue>("\"yesterday\"").is_err());
        assert!(serde_json::from_str::<TimestampValue>("true").is_err());
    }
}
