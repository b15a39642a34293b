//! Builds data models from read-only content snapshots.

use crate::dictionary::CaseInsensitiveMap;
use crate::intern::Interner;
use crate::model::{ContentCacheDataModel, CultureVariation, PropertyValueEntry, RawValue};
use folio_core::{CodecError, ContentSnapshot, ContentVariation, INVARIANT_CULTURE, NO_SEGMENT};
use std::sync::Arc;

/// Turns a [`ContentSnapshot`] state into a [`ContentCacheDataModel`].
///
/// - properties keep source order; null values are skipped
/// - values a property's variation cannot hold are skipped
/// - culture data is produced only for culture-variant content types
/// - aliases that differ only by case are rejected
#[derive(Debug, Clone)]
pub struct ContentDataBuilder {
    interner: Arc<dyn Interner>,
}

impl ContentDataBuilder {
    pub fn new(interner: Arc<dyn Interner>) -> Self {
        Self { interner }
    }

    /// Model for the requested state, or `None` when the snapshot has no
    /// such state.
    pub fn build(
        &self,
        snapshot: &ContentSnapshot,
        published: bool,
    ) -> Result<Option<ContentCacheDataModel>, CodecError> {
        let Some(state) = snapshot.state(published) else {
            return Ok(None);
        };
        let content_type = &snapshot.content_type;

        let property_data = if snapshot.properties.is_empty() {
            None
        } else {
            let mut data = CaseInsensitiveMap::with_capacity(snapshot.properties.len());
            for property in &snapshot.properties {
                let variation = content_type
                    .property_type(&property.alias)
                    .map(|p| p.variation)
                    .unwrap_or(ContentVariation::NOTHING);

                let entries: Vec<PropertyValueEntry> = property
                    .values
                    .iter()
                    .filter_map(|pv| {
                        let culture = pv.culture.as_deref().unwrap_or(INVARIANT_CULTURE);
                        let segment = pv.segment.as_deref().unwrap_or(NO_SEGMENT);
                        if !variation.supports(culture, segment) {
                            return None;
                        }
                        let value = RawValue::from_json(pv.value(published)?)?;
                        Some(PropertyValueEntry::new(
                            self.interner.intern(culture),
                            self.interner.intern(segment),
                            Some(value),
                        ))
                    })
                    .collect();

                if data.insert(self.interner.intern(&property.alias), entries).is_some() {
                    return Err(CodecError::corrupt(format_args!(
                        "duplicate property alias {:?} on node {}",
                        property.alias, snapshot.key
                    )));
                }
            }
            Some(data)
        };

        let culture_data = content_type.variation.varies_by_culture().then(|| {
            state
                .cultures
                .iter()
                .map(|c| {
                    (
                        self.interner.intern(&c.culture),
                        CultureVariation {
                            name: Some(c.name.clone()),
                            url_segment: c.url_segment.clone(),
                            date: c.update_date,
                            is_draft: !published && c.edited,
                        },
                    )
                })
                .collect::<CaseInsensitiveMap<_>>()
        });

        Ok(Some(ContentCacheDataModel {
            property_data,
            culture_data,
            url_segment: state.url_segment.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::InternPool;
    use folio_test_utils::fixtures;

    fn builder() -> ContentDataBuilder {
        ContentDataBuilder::new(InternPool::shared())
    }

    #[test]
    fn test_empty_invariant_node_has_absent_maps() {
        let snapshot = fixtures::empty_invariant_document();
        let model = builder()
            .build(&snapshot, true)
            .expect("build should succeed")
            .expect("published state exists");
        assert!(model.property_data.is_none());
        assert!(model.culture_data.is_none());
        assert_eq!(model.url_segment, None);
    }

    #[test]
    fn test_missing_state_yields_none() {
        let snapshot = fixtures::empty_invariant_document();
        let model = builder().build(&snapshot, false).expect("build should succeed");
        assert!(model.is_none());
    }

    #[test]
    fn test_multi_culture_values_keep_source_order() {
        let snapshot = fixtures::multi_culture_article();
        let model = builder()
            .build(&snapshot, true)
            .expect("build should succeed")
            .expect("published state exists");

        let titles = model.property("Title").expect("title should be stored");
        let cultures: Vec<&str> = titles.iter().map(|e| &*e.culture).collect();
        assert_eq!(cultures, vec!["en-US", "da-DK"]);
        assert_eq!(titles[0].value, Some(RawValue::Text("Hello".into())));
        assert_eq!(titles[1].value, Some(RawValue::Text("Hej".into())));

        let cultures = model.culture_data.as_ref().expect("culture data present");
        assert_eq!(cultures.len(), 2);
        assert!(cultures.get("EN-US").is_some());
    }

    #[test]
    fn test_values_unsupported_by_variation_are_skipped() {
        let snapshot = fixtures::multi_culture_article();
        let model = builder()
            .build(&snapshot, true)
            .expect("build should succeed")
            .expect("published state exists");
        // The invariant "sku" property carries a stray culture value in the fixture.
        let sku = model.property("sku").expect("sku should be stored");
        assert_eq!(sku.len(), 1);
        assert!(sku[0].is_invariant());
    }

    #[test]
    fn test_draft_flag_follows_culture_edits() {
        let snapshot = fixtures::multi_culture_article();
        let draft = builder()
            .build(&snapshot, false)
            .expect("build should succeed")
            .expect("draft state exists");
        let cultures = draft.culture_data.expect("culture data present");
        assert!(cultures.get("da-DK").expect("da-DK present").is_draft);
        assert!(!cultures.get("en-US").expect("en-US present").is_draft);

        let published = builder()

            .build(&snapshot, true)

            .expect("build should succeed")

            .expect("published state exists");
        let cultures = published.culture_data.expect("culture data present");
        assert!(cultures.values().all(|c| !c.is_draft));
    }

    #[test]
    fn test_aliases_differing_only_by_case_are_rejected() {
        let mut snapshot = fixtures::multi_culture_article();
        let mut shadow = snapshot.properties[0].clone();
        shadow.alias = shadow.alias.to_uppercase();
        snapshot.properties.push(shadow);

        let err = builder()
            .build(&snapshot, true)
            .expect_err("duplicate alias must be rejected");
        assert!(matches!(err, CodecError::CorruptPayload { .. }));
    }

    #[test]
    fn test_null_values_are_skipped() {
        let snapshot = fixtures::multi_culture_article();
        let draft = builder()
            .build(&snapshot, false)
            .expect("build should succeed")
            .expect("draft state exists");
        // "summary" has a published value only.
        assert_eq!(draft.property("summary").map(<[_]>::len), Some(0));
    }
}
