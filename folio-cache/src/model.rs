//! Property bag model: the serializable snapshot of one node state.
//!
//! Field tags are permanent. Add new fields with new tags; never reuse one.
//!
//! | type                    | field        | tag | name  |
//! |-------------------------|--------------|-----|-------|
//! | `ContentCacheDataModel` | property data| 0   | `pd`  |
//! |                         | culture data | 1   | `cd`  |
//! |                         | url segment  | 2   | `us`  |
//! | `PropertyValueEntry`    | culture      | 0   | `c`   |
//! |                         | segment      | 1   | `s`   |
//! |                         | value        | 2   | `v`   |
//! | `CultureVariation`      | name         | 0   | `nm`  |
//! |                         | url segment  | 1   | `us`  |
//! |                         | date         | 2   | `dt`  |
//! |                         | is draft     | 3   | `isd` |

use crate::dictionary::CaseInsensitiveMap;
use crate::envelope::LazyText;
use crate::wire::{
    DecodeContext, Field, FieldSeed, TimestampValue, Wire, WireDecode, WireEncode, WireFormat,
    WireTimestamp,
};
use folio_core::{eq_ignore_case, CodecError, Timestamp};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

const MODEL_PROPERTY_DATA: Field = Field::new(0, "pd");
const MODEL_CULTURE_DATA: Field = Field::new(1, "cd");
const MODEL_URL_SEGMENT: Field = Field::new(2, "us");
const MODEL_FIELDS: &[Field] = &[MODEL_PROPERTY_DATA, MODEL_CULTURE_DATA, MODEL_URL_SEGMENT];

const ENTRY_CULTURE: Field = Field::new(0, "c");
const ENTRY_SEGMENT: Field = Field::new(1, "s");
const ENTRY_VALUE: Field = Field::new(2, "v");
const ENTRY_FIELDS: &[Field] = &[ENTRY_CULTURE, ENTRY_SEGMENT, ENTRY_VALUE];

const CULTURE_NAME: Field = Field::new(0, "nm");
const CULTURE_URL_SEGMENT: Field = Field::new(1, "us");
const CULTURE_DATE: Field = Field::new(2, "dt");
const CULTURE_IS_DRAFT: Field = Field::new(3, "isd");
const CULTURE_FIELDS: &[Field] = &[CULTURE_NAME, CULTURE_URL_SEGMENT, CULTURE_DATE, CULTURE_IS_DRAFT];

// ============================================================================
// RAW VALUES
// ============================================================================

/// A stored property value, before any editor-specific conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// JSON object or array.
    Graph(Value),
    /// Text kept compressed until read.
    Compressed(LazyText),
}

impl RawValue {
    /// Map a source value onto the stored shape. `null` has no stored shape.
    pub fn from_json(value: &Value) -> Option<RawValue> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(RawValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(RawValue::Integer(i)),
                None => n.as_f64().map(RawValue::Decimal),
            },
            Value::String(s) => Some(RawValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(RawValue::Graph(value.clone())),
        }
    }

    /// Text content, inflating compressed text. `None` for non-text values.
    pub fn text(&self) -> Result<Option<Cow<'_, str>>, CodecError> {
        match self {
            RawValue::Text(s) => Ok(Some(Cow::Borrowed(s))),
            RawValue::Compressed(lazy) => lazy.text().map(|s| Some(Cow::Borrowed(s))),
            _ => Ok(None),
        }
    }

    /// Equivalent value with compressed text inflated.
    pub fn inflated(&self) -> Result<Cow<'_, RawValue>, CodecError> {
        match self {
            RawValue::Compressed(lazy) => Ok(Cow::Owned(RawValue::Text(lazy.text()?.to_string()))),
            other => Ok(Cow::Borrowed(other)),
        }
    }

    pub fn to_json(&self) -> Result<Value, CodecError> {
        Ok(match self {
            RawValue::Text(s) => Value::String(s.clone()),
            RawValue::Integer(i) => Value::from(*i),
            RawValue::Decimal(d) => Value::from(finite(*d).map_err(CodecError::fault)?),
            RawValue::Boolean(b) => Value::Bool(*b),
            RawValue::Graph(v) => v.clone(),
            RawValue::Compressed(lazy) => Value::String(lazy.text()?.to_string()),
        })
    }
}

/// Stored decimals are finite; JSON has no form for NaN or infinity.
fn finite(d: f64) -> Result<f64, String> {
    if d.is_finite() {
        Ok(d)
    } else {
        Err(format!("non-finite decimal {d}"))
    }
}

impl WireEncode for RawValue {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            RawValue::Text(s) => serializer.serialize_str(s),
            RawValue::Integer(i) => serializer.serialize_i64(*i),
            RawValue::Decimal(d) => serializer.serialize_f64(finite(*d).map_err(serde::ser::Error::custom)?),
            RawValue::Boolean(b) => serializer.serialize_bool(*b),
            RawValue::Graph(v) => serde::Serialize::serialize(v, serializer),
            RawValue::Compressed(lazy) => match format {
                WireFormat::Tagged => serializer.serialize_bytes(lazy.compressed()),
                WireFormat::Named => {
                    let text = lazy.text().map_err(serde::ser::Error::custom)?;
                    serializer.serialize_str(text)
                }
            },
        }
    }
}

impl WireDecode for RawValue {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        _ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RawValueVisitor)
    }
}

struct RawValueVisitor;

impl<'de> Visitor<'de> for RawValueVisitor {
    type Value = RawValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a property value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<RawValue, E> {
        Ok(RawValue::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawValue, E> {
        Ok(RawValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawValue, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => RawValue::Integer(i),
            Err(_) => RawValue::Decimal(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawValue, E> {
        Ok(RawValue::Decimal(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RawValue, E> {
        Ok(RawValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<RawValue, E> {
        Ok(RawValue::Text(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<RawValue, E> {
        Ok(RawValue::Compressed(LazyText::from_compressed(v.to_vec())))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<RawValue, E> {
        Ok(RawValue::Compressed(LazyText::from_compressed(v)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<RawValue, A::Error> {
        Value::deserialize(de::value::SeqAccessDeserializer::new(seq)).map(RawValue::Graph)
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<RawValue, A::Error> {
        Value::deserialize(de::value::MapAccessDeserializer::new(map)).map(RawValue::Graph)
    }
}

// ============================================================================
// PROPERTY VALUE ENTRY
// ============================================================================

/// One value of a property for a (culture, segment) pair.
///
/// Empty culture means invariant; empty segment means unsegmented.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValueEntry {
    pub culture: Arc<str>,
    pub segment: Arc<str>,
    pub value: Option<RawValue>,
}

impl PropertyValueEntry {
    pub fn new(culture: Arc<str>, segment: Arc<str>, value: Option<RawValue>) -> Self {
        Self {
            culture,
            segment,
            value,
        }
    }

    /// Invariant, unsegmented entry.
    pub fn invariant(value: RawValue) -> Self {
        Self::new(Arc::from(""), Arc::from(""), Some(value))
    }

    pub fn is_invariant(&self) -> bool {
        self.culture.is_empty()
    }

    /// Whether this entry serves `culture`/`segment` exactly (culture
    /// compared case-insensitively).
    pub fn matches(&self, culture: &str, segment: &str) -> bool {
        eq_ignore_case(&self.culture, culture) && *self.segment == *segment
    }
}

impl WireEncode for PropertyValueEntry {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let len = usize::from(!self.culture.is_empty())
            + usize::from(!self.segment.is_empty())
            + usize::from(self.value.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if !self.culture.is_empty() {
            map.serialize_entry(&ENTRY_CULTURE.key(format), &*self.culture)?;
        }
        if !self.segment.is_empty() {
            map.serialize_entry(&ENTRY_SEGMENT.key(format), &*self.segment)?;
        }
        if let Some(value) = &self.value {
            map.serialize_entry(&ENTRY_VALUE.key(format), &Wire::new(value, format))?;
        }
        map.end()
    }
}

impl WireDecode for PropertyValueEntry {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        struct EntryVisitor<'a>(DecodeContext<'a>);

        impl<'de> Visitor<'de> for EntryVisitor<'_> {
            type Value = PropertyValueEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a property value entry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut culture = None;
                let mut segment = None;
                let mut value = None;
                while let Some(tag) = map.next_key_seed(FieldSeed(ENTRY_FIELDS))? {
                    match tag {
                        Some(0) => culture = Some(map.next_value_seed(self.0.interned())?),
                        Some(1) => segment = Some(map.next_value_seed(self.0.interned())?),
                        Some(2) => {
                            value = map.next_value_seed(OptionalSeed(self.0))?;
                        }
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(PropertyValueEntry {
                    culture: culture.unwrap_or_else(|| self.0.intern("")),
                    segment: segment.unwrap_or_else(|| self.0.intern("")),
                    value,
                })
            }
        }

        deserializer.deserialize_map(EntryVisitor(ctx))
    }
}

/// Reads a raw value that may be written as an explicit null.
struct OptionalSeed<'a>(DecodeContext<'a>);

impl<'de> de::DeserializeSeed<'de> for OptionalSeed<'_> {
    type Value = Option<RawValue>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_option(self)
    }
}

impl<'de> Visitor<'de> for OptionalSeed<'_> {
    type Value = Option<RawValue>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a property value or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        RawValue::decode(deserializer, self.0).map(Some)
    }
}

// ============================================================================
// CULTURE VARIATION
// ============================================================================

/// Per-culture metadata of one node state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CultureVariation {
    pub name: Option<String>,
    pub url_segment: Option<String>,
    pub date: Timestamp,
    pub is_draft: bool,
}

impl WireEncode for CultureVariation {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let len = 1
            + usize::from(self.name.is_some())
            + usize::from(self.url_segment.is_some())
            + usize::from(self.is_draft);
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(name) = &self.name {
            map.serialize_entry(&CULTURE_NAME.key(format), name)?;
        }
        if let Some(url_segment) = &self.url_segment {
            map.serialize_entry(&CULTURE_URL_SEGMENT.key(format), url_segment)?;
        }
        map.serialize_entry(&CULTURE_DATE.key(format), &WireTimestamp(&self.date, format))?;
        if self.is_draft {
            map.serialize_entry(&CULTURE_IS_DRAFT.key(format), &true)?;
        }
        map.end()
    }
}

impl WireDecode for CultureVariation {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        _ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        struct CultureVisitor;

        impl<'de> Visitor<'de> for CultureVisitor {
            type Value = CultureVariation;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("culture variation data")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut culture = CultureVariation {
                    name: None,
                    url_segment: None,
                    date: Timestamp::default(),
                    is_draft: false,
                };
                while let Some(tag) = map.next_key_seed(FieldSeed(CULTURE_FIELDS))? {
                    match tag {
                        Some(0) => culture.name = map.next_value()?,
                        Some(1) => culture.url_segment = map.next_value()?,
                        Some(2) => culture.date = map.next_value::<TimestampValue>()?.0,
                        Some(3) => culture.is_draft = map.next_value()?,
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(culture)
            }
        }

        deserializer.deserialize_map(CultureVisitor)
    }
}

// ============================================================================
// DATA MODEL
// ============================================================================

/// Serializable snapshot of one node state.
///
/// `property_data` and `culture_data` are independently optional; an
/// absent map and a present-but-empty map are different states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentCacheDataModel {
    pub property_data: Option<CaseInsensitiveMap<Vec<PropertyValueEntry>>>,
    pub culture_data: Option<CaseInsensitiveMap<CultureVariation>>,
    pub url_segment: Option<String>,
}

impl ContentCacheDataModel {
    /// Stored values of a property, in source order.
    pub fn property(&self, alias: &str) -> Option<&[PropertyValueEntry]> {
        self.property_data
            .as_ref()
            .and_then(|data| data.get(alias))
            .map(Vec::as_slice)
    }

    pub fn culture(&self, culture: &str) -> Option<&CultureVariation> {
        self.culture_data.as_ref().and_then(|data| data.get(culture))
    }

    /// Number of stored property values across all aliases.
    pub fn value_count(&self) -> usize {
        self.property_data
            .as_ref()
            .map(|data| data.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl WireEncode for ContentCacheDataModel {
    fn encode<S: Serializer>(
        &self,
        format: WireFormat,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let len = usize::from(self.property_data.is_some())
            + usize::from(self.culture_data.is_some())
            + usize::from(self.url_segment.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(data) = &self.property_data {
            map.serialize_entry(&MODEL_PROPERTY_DATA.key(format), &Wire::new(data, format))?;
        }
        if let Some(data) = &self.culture_data {
            map.serialize_entry(&MODEL_CULTURE_DATA.key(format), &Wire::new(data, format))?;
        }
        if let Some(url_segment) = &self.url_segment {
            map.serialize_entry(&MODEL_URL_SEGMENT.key(format), url_segment)?;
        }
        map.end()
    }
}

impl WireDecode for ContentCacheDataModel {
    fn decode<'de, D: Deserializer<'de>>(
        deserializer: D,
        ctx: DecodeContext<'_>,
    ) -> Result<Self, D::Error> {
        struct ModelVisitor<'a>(DecodeContext<'a>);

        impl<'de> Visitor<'de> for ModelVisitor<'_> {
            type Value = ContentCacheDataModel;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a content cache data model")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut model = ContentCacheDataModel::default();
                while let Some(tag) = map.next_key_seed(FieldSeed(MODEL_FIELDS))? {
                    match tag {
                        Some(0) => model.property_data = Some(map.next_value_seed(self.0.seed())?),
                        Some(1) => model.culture_data = Some(map.next_value_seed(self.0.seed())?),
                        Some(2) => model.url_segment = map.next_value()?,
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(model)
            }
        }

        deserializer.deserialize_map(ModelVisitor(ctx))
    }
}
