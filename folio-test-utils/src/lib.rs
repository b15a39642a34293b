//! FOLIO Test Utilities
//!
//! Shared test infrastructure for the FOLIO workspace:
//! - Proptest generators for content snapshots
//! - Fixtures for common content shapes
//! - Custom assertions for codec and settings errors

pub use folio_core::{
    CacheSettings, CodecError, ConfigError, ContentSnapshot, ContentTypeRef, ContentVariation,
    CultureSnapshot, EntityKind, FolioError, FolioResult, NodeKey, PropertySnapshot,
    PropertyTypeRef, PropertyValueSnapshot, StateSnapshot, Timestamp,
};

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Editor alias used for long rich-text values in fixtures.
pub const RICH_TEXT_EDITOR: &str = "Umbraco.RichText";

/// Editor alias used for short text values in fixtures.
pub const TEXT_BOX_EDITOR: &str = "Umbraco.TextBox";

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating content snapshots.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const CULTURES: [&str; 4] = ["en-US", "da-DK", "fr-FR", "de-DE"];

    /// Generate a random NodeKey.
    pub fn arb_node_key() -> impl Strategy<Value = NodeKey> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp with whole-second precision (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Generate an EntityKind variant.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            Just(EntityKind::Document),
            Just(EntityKind::Media),
            Just(EntityKind::Member),
        ]
    }

    /// Generate a non-empty subset of the known cultures, in a stable order.
    pub fn arb_cultures() -> impl Strategy<Value = Vec<String>> {
        prop::sample::subsequence(CULTURES.to_vec(), 1..=CULTURES.len())
            .prop_map(|cs| cs.into_iter().map(str::to_string).collect())
    }

    /// Generate a scalar or small graph property value.
    pub fn arb_property_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-zA-Z0-9 <>/]{0,80}".prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e9f64..1.0e9f64).prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(|v| json!(v)),
            ("[a-z]{1,8}", any::<i32>()).prop_map(|(k, v)| {
                Value::Object(serde_json::Map::from_iter([(k, Value::from(v))]))
            }),
        ]
    }

    /// Generate property aliases that are unique ignoring case.
    pub fn arb_aliases() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[a-z][a-z0-9]{0,7}", 0..6)
            .prop_map(|set: BTreeSet<String>| set.into_iter().collect())
    }

    fn arb_state(cultures: Vec<String>) -> impl Strategy<Value = StateSnapshot> {
        let n = cultures.len();
        (
            "[A-Za-z ]{1,24}",
            1i32..10_000,
            arb_timestamp(),
            0i32..100,
            prop::option::of(1i32..500),
            prop::collection::vec((arb_timestamp(), any::<bool>(), prop::option::of("[a-z-]{1,16}")), n),
            prop::option::of("[a-z-]{1,16}"),
        )
            .prop_map(
                move |(name, version_id, version_date, writer_id, template_id, per_culture, url_segment)| {
                    StateSnapshot {
                        cultures: cultures
                            .iter()
                            .zip(per_culture)
                            .map(|(culture, (update_date, edited, url_segment))| CultureSnapshot {
                                culture: culture.clone(),
                                name: format!("{name} ({culture})"),
                                url_segment,
                                update_date,
                                edited,
                            })
                            .collect(),
                        name,
                        version_id,
                        version_date,
                        writer_id,
                        template_id,
                        url_segment,
                    }
                },
            )
    }

    /// Generate a consistent ContentSnapshot.
    ///
    /// Aliases are unique, culture values only appear on culture-variant
    /// properties, and the content type varies by culture whenever one of its
    /// properties does.
    pub fn arb_content_snapshot() -> impl Strategy<Value = ContentSnapshot> {
        (arb_aliases(), arb_cultures(), any::<bool>())
            .prop_flat_map(|(aliases, cultures, type_varies)| {
                let properties = aliases
                    .into_iter()
                    .map(|alias| {
                        let cultures = cultures.clone();
                        let values = prop::collection::vec(
                            (
                                prop::option::of(arb_property_value()),
                                prop::option::of(arb_property_value()),
                            ),
                            cultures.len(),
                        );
                        (Just(alias), any::<bool>(), values).prop_map(
                            move |(alias, varies, values)| {
                                let varies = varies && type_varies;
                                let values: Vec<PropertyValueSnapshot> = if varies {
                                    cultures
                                        .iter()
                                        .zip(values)
                                        .map(|(c, (e, p))| PropertyValueSnapshot::for_culture(c, e, p))
                                        .collect()
                                } else {
                                    values
                                        .into_iter()
                                        .take(1)
                                        .map(|(e, p)| PropertyValueSnapshot::invariant(e, p))
                                        .collect()
                                };
                                (alias, varies, values)
                            },
                        )
                    })
                    .collect::<Vec<_>>();

                let state_cultures = if type_varies { cultures } else { Vec::new() };
                (
                    properties,
                    Just(type_varies),
                    1i32..100_000,
                    arb_node_key(),
                    arb_entity_kind(),
                    0i32..50,
                    arb_timestamp(),
                    prop::option::of(arb_state(state_cultures.clone())),
                    prop::option::of(arb_state(state_cultures)),
                )
            })
            .prop_map(
                |(properties, type_varies, id, key, kind, sort_order, create_date, draft, published)| {
                    let variation = if type_varies {
                        ContentVariation::CULTURE
                    } else {
                        ContentVariation::NOTHING
                    };
                    let property_types = properties
                        .iter()
                        .map(|(alias, varies, _)| PropertyTypeRef {
                            alias: alias.clone(),
                            editor_alias: TEXT_BOX_EDITOR.to_string(),
                            variation: if *varies {
                                ContentVariation::CULTURE
                            } else {
                                ContentVariation::NOTHING
                            },
                        })
                        .collect();
                    ContentSnapshot {
                        id,
                        key,
                        kind,
                        content_type: Arc::new(ContentTypeRef {
                            id: 1000 + id % 7,
                            alias: "generated".to_string(),
                            variation,
                            property_types,
                        }),
                        sort_order,
                        create_date,
                        creator_id: 0,
                        properties: properties
                            .into_iter()
                            .map(|(alias, _, values)| PropertySnapshot { alias, values })
                            .collect(),
                        draft,
                        published,
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built content snapshots for common testing scenarios.

    use super::*;

    fn at(year: i32, month: u32, day: u32, hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    fn state(name: &str, version_id: i32, cultures: Vec<CultureSnapshot>) -> StateSnapshot {
        StateSnapshot {
            name: name.to_string(),
            version_id,
            version_date: at(2024, 3, 1, 9),
            writer_id: 0,
            template_id: Some(1051),
            cultures,
            url_segment: None,
        }
    }

    fn property_type(alias: &str, editor: &str, variation: ContentVariation) -> PropertyTypeRef {
        PropertyTypeRef {
            alias: alias.to_string(),
            editor_alias: editor.to_string(),
            variation,
        }
    }

    /// Long enough to cross the default compression threshold.
    pub fn rich_text(lead: &str) -> String {
        format!(
            "<p>{lead}</p><p>Lorem ipsum dolor sit amet, consectetur adipiscing elit. \
             Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.</p>"
        )
    }

    /// Published invariant document with no properties and no draft.
    pub fn empty_invariant_document() -> ContentSnapshot {
        ContentSnapshot {
            id: 1001,
            key: Uuid::from_u128(0x6f1c_2a44_0d7e_4b0c_9a51_3d2e_8f10_1001),
            kind: EntityKind::Document,
            content_type: Arc::new(ContentTypeRef {
                id: 1050,
                alias: "emptyPage".to_string(),
                variation: ContentVariation::NOTHING,
                property_types: Vec::new(),
            }),
            sort_order: 0,
            create_date: at(2024, 1, 15, 8),
            creator_id: 0,
            properties: Vec::new(),
            draft: None,
            published: Some(state("Empty", 1, Vec::new())),
        }
    }

    /// Culture-variant article with draft and published states.
    ///
    /// - `title` varies by culture (en-US, da-DK)
    /// - `sku` is invariant and carries one stray en-US value
    /// - `summary` has a published value only
    /// - `bodyText` holds long rich text per culture
    /// - `count` is an invariant integer, `blocks` an invariant JSON graph
    pub fn multi_culture_article() -> ContentSnapshot {
        let cultures = |published: bool| {
            vec![
                CultureSnapshot {
                    culture: "en-US".to_string(),
                    name: "Hello world".to_string(),
                    url_segment: Some("hello-world".to_string()),
                    update_date: at(2024, 3, 1, 9),
                    edited: false,
                },
                CultureSnapshot {
                    culture: "da-DK".to_string(),
                    name: "Hej verden".to_string(),
                    url_segment: Some("hej-verden".to_string()),
                    update_date: at(2024, 3, 2, 10),
                    edited: !published,
                },
            ]
        };

        let both = |v: Value| (Some(v.clone()), Some(v));

        let (title_en_e, title_en_p) = both(json!("Hello"));
        let (title_da_e, title_da_p) = both(json!("Hej"));
        let (sku_e, sku_p) = both(json!("SKU-1"));
        let (body_en_e, body_en_p) = both(Value::from(rich_text("Hello")));
        let (body_da_e, body_da_p) = both(Value::from(rich_text("Hej")));
        let (count_e, count_p) = both(json!(42));
        let (blocks_e, blocks_p) = both(json!({
            "layout": [{ "contentKey": "a1" }, { "contentKey": "b2" }],
            "count": 2
        }));

        ContentSnapshot {
            id: 1002,
            key: Uuid::from_u128(0x0b8e_77d3_52aa_4c6e_8d0f_6a3b_9c21_1002),
            kind: EntityKind::Document,
            content_type: Arc::new(ContentTypeRef {
                id: 1060,
                alias: "article".to_string(),
                variation: ContentVariation::CULTURE,
                property_types: vec![
                    property_type("title", TEXT_BOX_EDITOR, ContentVariation::CULTURE),
                    property_type("sku", TEXT_BOX_EDITOR, ContentVariation::NOTHING),
                    property_type("summary", "Umbraco.TextArea", ContentVariation::NOTHING),
                    property_type("bodyText", RICH_TEXT_EDITOR, ContentVariation::CULTURE),
                    property_type("count", "Umbraco.Integer", ContentVariation::NOTHING),
                    property_type("blocks", "Umbraco.BlockList", ContentVariation::NOTHING),
                ],
            }),
            sort_order: 3,
            create_date: at(2024, 2, 20, 14),
            creator_id: 0,
            properties: vec![
                PropertySnapshot {
                    alias: "title".to_string(),
                    values: vec![
                        PropertyValueSnapshot::for_culture("en-US", title_en_e, title_en_p),
                        PropertyValueSnapshot::for_culture("da-DK", title_da_e, title_da_p),
                    ],
                },
                PropertySnapshot {
                    alias: "sku".to_string(),
                    values: vec![
                        PropertyValueSnapshot::invariant(sku_e, sku_p),
                        PropertyValueSnapshot::for_culture(
                            "en-US",
                            Some(json!("stray")),
                            Some(json!("stray")),
                        ),
                    ],
                },
                PropertySnapshot {
                    alias: "summary".to_string(),
                    values: vec![PropertyValueSnapshot::invariant(
                        None,
                        Some(json!("Short summary")),
                    )],
                },
                PropertySnapshot {
                    alias: "bodyText".to_string(),
                    values: vec![
                        PropertyValueSnapshot::for_culture("en-US", body_en_e, body_en_p),
                        PropertyValueSnapshot::for_culture("da-DK", body_da_e, body_da_p),
                    ],
                },
                PropertySnapshot {
                    alias: "count".to_string(),
                    values: vec![PropertyValueSnapshot::invariant(count_e, count_p)],
                },
                PropertySnapshot {
                    alias: "blocks".to_string(),
                    values: vec![PropertyValueSnapshot::invariant(blocks_e, blocks_p)],
                },
            ],
            draft: Some(state("Hello world", 7, cultures(false))),
            published: Some(state("Hello world", 6, cultures(true))),
        }
    }

    /// Media item with a single invariant property, published only.
    pub fn media_image() -> ContentSnapshot {
        ContentSnapshot {
            id: 2001,
            key: Uuid::from_u128(0x3c9d_1e02_7f45_4a8b_b2c6_0e1f_5d7a_2001),
            kind: EntityKind::Media,
            content_type: Arc::new(ContentTypeRef {
                id: 1032,
                alias: "Image".to_string(),
                variation: ContentVariation::NOTHING,
                property_types: vec![property_type(
                    "umbracoFile",
                    "Umbraco.ImageCropper",
                    ContentVariation::NOTHING,
                )],
            }),
            sort_order: 0,
            create_date: at(2024, 1, 5, 12),
            creator_id: 0,
            properties: vec![PropertySnapshot {
                alias: "umbracoFile".to_string(),
                values: vec![PropertyValueSnapshot::invariant(
                    None,
                    Some(json!({ "src": "/media/photo.jpg", "crops": [] })),
                )],
            }],
            draft: None,
            published: Some(state("photo.jpg", 1, Vec::new())),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for FOLIO-specific validation.

    use super::*;

    /// Assert that a codec result is a corrupt payload error.
    #[track_caller]
    pub fn assert_corrupt<T: std::fmt::Debug>(result: &Result<T, CodecError>) {
        match result {
            Err(CodecError::CorruptPayload { .. }) => {}
            other => panic!("Expected CorruptPayload, got: {:?}", other),
        }
    }

    /// Assert that a codec result is a configuration mismatch.
    #[track_caller]
    pub fn assert_configuration_mismatch<T: std::fmt::Debug>(result: &Result<T, CodecError>) {
        match result {
            Err(CodecError::ConfigurationMismatch { .. }) => {}
            other => panic!("Expected ConfigurationMismatch, got: {:?}", other),
        }
    }

    /// Assert that a FolioResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &FolioResult<T>) {
        match result {
            Err(FolioError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that settings pass validation.
    #[track_caller]
    pub fn assert_settings_valid(settings: &CacheSettings) {
        if let Err(e) = settings.validate() {
            panic!("Expected valid settings, got: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_invariant_document_fixture() {
        let snapshot = fixtures::empty_invariant_document();
        assert!(snapshot.properties.is_empty());
        assert!(snapshot.draft.is_none());
        assert!(snapshot.published.is_some());
    }

    #[test]
    fn test_multi_culture_article_fixture() {
        let snapshot = fixtures::multi_culture_article();
        assert!(snapshot.content_type.variation.varies_by_culture());
        assert_eq!(snapshot.properties.len(), 6);
        let body = fixtures::rich_text("Hello");
        assert!(body.len() >= 64);
    }

    #[test]
    fn test_default_settings_are_valid() {
        assertions::assert_settings_valid(&CacheSettings::default());
    }

    proptest! {
        #[test]
        fn prop_generated_values_fit_variation(snapshot in generators::arb_content_snapshot()) {
            for property in &snapshot.properties {
                let property_type = snapshot
                    .content_type
                    .property_type(&property.alias)
                    .expect("every property has a type");
                for value in &property.values {
                    let culture = value.culture.as_deref().unwrap_or("");
                    prop_assert!(property_type.variation.supports(culture, ""));
                }
            }
        }
    }
}
