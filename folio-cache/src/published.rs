//! Read model over a cached node.
//!
//! [`PublishedContent`] exposes one state of a [`ContentCacheNode`] to
//! rendering code. Nothing is decoded until a property, name or URL segment
//! is read. Converted values are memoized per (alias, culture, segment) for
//! the variants a property actually stores.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use folio_core::{
    fold_case, CodecError, ContentTypeRef, ContentVariation, INVARIANT_CULTURE, NO_SEGMENT,
};
use serde_json::Value;

use crate::dictionary::CaseInsensitiveMap;
use crate::model::{ContentCacheDataModel, PropertyValueEntry, RawValue};
use crate::node::{ContentCacheNode, NodeData};

// ============================================================================
// CONVERTERS
// ============================================================================

/// A property value after editor-specific conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertedValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Json(Value),
}

impl ConvertedValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConvertedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Converts stored values of one property editor.
///
/// Converters receive inflated values: compressed text arrives as
/// [`RawValue::Text`].
pub trait PropertyValueConverter: Send + Sync + fmt::Debug {
    /// Editor aliases this converter handles.
    fn editor_aliases(&self) -> &[&'static str];

    /// `None` when the stored value has no meaning for this editor.
    fn convert(&self, raw: &RawValue) -> Option<ConvertedValue>;
}

/// Text editors. Scalars are rendered as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextValueConverter;

impl PropertyValueConverter for TextValueConverter {
    fn editor_aliases(&self) -> &[&'static str] {
        &["Umbraco.TextBox", "Umbraco.TextArea", "Umbraco.RichText", "Umbraco.MarkdownEditor"]
    }

    fn convert(&self, raw: &RawValue) -> Option<ConvertedValue> {
        let text = match raw {
            RawValue::Text(s) => s.clone(),
            RawValue::Integer(i) => i.to_string(),
            RawValue::Decimal(d) => d.to_string(),
            RawValue::Boolean(b) => b.to_string(),
            RawValue::Graph(_) | RawValue::Compressed(_) => return None,
        };
        Some(ConvertedValue::Text(text))
    }
}

/// Integer editors. Numeric text is parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerValueConverter;

impl PropertyValueConverter for IntegerValueConverter {
    fn editor_aliases(&self) -> &[&'static str] {
        &["Umbraco.Integer", "Umbraco.Slider"]
    }

    fn convert(&self, raw: &RawValue) -> Option<ConvertedValue> {
        match raw {
            RawValue::Integer(i) => Some(ConvertedValue::Integer(*i)),
            RawValue::Boolean(b) => Some(ConvertedValue::Integer(i64::from(*b))),
            RawValue::Text(s) => s.trim().parse().ok().map(ConvertedValue::Integer),
            _ => None,
        }
    }
}

/// Editors that store a JSON graph. Text holding JSON is parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueConverter;

impl PropertyValueConverter for JsonValueConverter {
    fn editor_aliases(&self) -> &[&'static str] {
        &[
            "Umbraco.BlockList",
            "Umbraco.BlockGrid",
            "Umbraco.MediaPicker3",
            "Umbraco.MultiUrlPicker",
            "Umbraco.ImageCropper",
        ]
    }

    fn convert(&self, raw: &RawValue) -> Option<ConvertedValue> {
        match raw {
            RawValue::Graph(v) => Some(ConvertedValue::Json(v.clone())),
            RawValue::Text(s) => serde_json::from_str(s).ok().map(ConvertedValue::Json),
            _ => None,
        }
    }
}

/// Converters by editor alias, matched case-insensitively. Editors without
/// a converter get the stored value as is.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: CaseInsensitiveMap<Arc<dyn PropertyValueConverter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TextValueConverter));
        registry.register(Arc::new(IntegerValueConverter));
        registry.register(Arc::new(JsonValueConverter));
        registry
    }
}

impl ConverterRegistry {
    pub fn empty() -> Self {
        Self {
            converters: CaseInsensitiveMap::new(),
        }
    }

    /// Register a converter for all its editor aliases, replacing earlier ones.
    pub fn register(&mut self, converter: Arc<dyn PropertyValueConverter>) {
        for alias in converter.editor_aliases() {
            self.converters.insert(Arc::from(*alias), Arc::clone(&converter));
        }
    }

    pub fn get(&self, editor_alias: &str) -> Option<&Arc<dyn PropertyValueConverter>> {
        self.converters.get(editor_alias)
    }

    pub fn convert(&self, editor_alias: &str, raw: &RawValue) -> Result<Option<ConvertedValue>, CodecError> {
        let raw = raw.inflated()?;
        Ok(match self.get(editor_alias) {
            Some(converter) => converter.convert(&raw),
            None => passthrough(&raw),
        })
    }
}

fn passthrough(raw: &RawValue) -> Option<ConvertedValue> {
    Some(match raw {
        RawValue::Text(s) => ConvertedValue::Text(s.clone()),
        RawValue::Integer(i) => ConvertedValue::Integer(*i),
        RawValue::Decimal(d) => ConvertedValue::Decimal(*d),
        RawValue::Boolean(b) => ConvertedValue::Boolean(*b),
        RawValue::Graph(v) => ConvertedValue::Json(v.clone()),
        RawValue::Compressed(_) => return None,
    })
}

// ============================================================================
// PUBLISHED CONTENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    alias: String,
    culture: String,
    segment: String,
}

/// One state of a cached node, as seen by a reader.
///
/// In preview the draft state is read when the node has one; otherwise the
/// published state is read.
pub struct PublishedContent {
    node: Arc<ContentCacheNode>,
    content_type: Arc<ContentTypeRef>,
    converters: Arc<ConverterRegistry>,
    published: bool,
    values: DashMap<ValueKey, Option<ConvertedValue>>,
}

impl fmt::Debug for PublishedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedContent")
            .field("key", &self.node.key())
            .field("content_type", &self.content_type.alias)
            .field("published", &self.published)
            .field("memoized_values", &self.values.len())
            .finish()
    }
}

impl PublishedContent {
    pub fn new(
        node: Arc<ContentCacheNode>,
        content_type: Arc<ContentTypeRef>,
        converters: Arc<ConverterRegistry>,
        preview: bool,
    ) -> Self {
        let published = !(preview && node.is_draft());
        Self {
            node,
            content_type,
            converters,
            published,
            values: DashMap::new(),
        }
    }

    pub fn node(&self) -> &Arc<ContentCacheNode> {
        &self.node
    }

    pub fn content_type(&self) -> &ContentTypeRef {
        &self.content_type
    }

    /// Whether the published state backs this view (as opposed to the draft).
    pub fn reads_published(&self) -> bool {
        self.published
    }

    /// Name for `culture`. Invariant content ignores the culture.
    pub fn name(&self, culture: &str) -> Result<Option<String>, CodecError> {
        if self.content_type.variation.varies_by_culture() && !culture.is_empty() {
            return self.with_model(|model| model.culture(culture).and_then(|c| c.name.clone()));
        }
        Ok(self.node.metadata(self.published).map(|m| m.name.clone()))
    }

    /// URL segment for `culture`. Invariant content ignores the culture.
    pub fn url_segment(&self, culture: &str) -> Result<Option<String>, CodecError> {
        let by_culture = self.content_type.variation.varies_by_culture() && !culture.is_empty();
        self.with_model(|model| {
            if by_culture {
                model.culture(culture).and_then(|c| c.url_segment.clone())
            } else {
                model.url_segment.clone()
            }
        })
    }

    /// Converted value of a property for `culture`/`segment`.
    ///
    /// Cultures and segments the property does not vary by are ignored. A
    /// missing segment value falls back to the unsegmented one. Only
    /// variants stored on the property are memoized.
    pub fn value(
        &self,
        alias: &str,
        culture: &str,
        segment: &str,
    ) -> Result<Option<ConvertedValue>, CodecError> {
        let Some(property_type) = self.content_type.property_type(alias) else {
            tracing::debug!(alias, content_type = %self.content_type.alias, "Unknown property");
            return Ok(None);
        };
        let (culture, segment) = effective_variant(property_type.variation, culture, segment);

        let key = ValueKey {
            alias: property_type.alias.clone(),
            culture: fold_case(culture).into_owned(),
            segment: segment.to_string(),
        };
        if let Some(memoized) = self.values.get(&key) {
            return Ok(memoized.clone());
        }

        let data = self.data()?;
        let Some(model) = data.model() else {
            return Ok(None);
        };
        let (raw, stored) = select(model, alias, culture, segment);
        let converted = match raw {
            Some(raw) => self.converters.convert(&property_type.editor_alias, raw)?,
            None => None,
        };
        if !stored {
            return Ok(converted);
        }
        Ok(self.values.entry(key).or_insert(converted).clone())
    }

    pub fn has_value(&self, alias: &str, culture: &str, segment: &str) -> Result<bool, CodecError> {
        Ok(self.value(alias, culture, segment)?.is_some())
    }

    fn data(&self) -> Result<NodeData, CodecError> {
        self.node.data_model(self.published)
    }

    fn with_model<T>(&self, read: impl FnOnce(&ContentCacheDataModel) -> Option<T>) -> Result<Option<T>, CodecError> {
        Ok(self.data()?.model().and_then(|model| read(model)))
    }

    #[cfg(test)]
    fn memoized(&self) -> usize {
        self.values.len()
    }
}

fn effective_variant<'a>(variation: ContentVariation, culture: &'a str, segment: &'a str) -> (&'a str, &'a str) {
    let culture = if variation.varies_by_culture() {
        culture
    } else {
        INVARIANT_CULTURE
    };
    let segment = if variation.varies_by_segment() {
        segment
    } else {
        NO_SEGMENT
    };
    (culture, segment)
}

/// Raw value for `culture`/`segment`, and whether the property stores an
/// entry for exactly that pair.
fn select<'m>(
    model: &'m ContentCacheDataModel,
    alias: &str,
    culture: &str,
    segment: &str,
) -> (Option<&'m RawValue>, bool) {
    let Some(entries) = model.property(alias) else {
        return (None, false);
    };
    let find = |segment: &str| -> Option<&'m PropertyValueEntry> {
        entries.iter().find(|e| e.matches(culture, segment))
    };
    let exact = find(segment);
    let raw = exact.and_then(|e| e.value.as_ref()).or_else(|| {
        if segment.is_empty() {
            None
        } else {
            find(NO_SEGMENT).and_then(|e| e.value.as_ref())
        }
    });
    (raw, exact.is_some())
}
