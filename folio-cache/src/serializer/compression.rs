//! Per-property compression policy for the binary codec.

use folio_core::{fold_case, CompressionSettings, ContentSource};
use std::collections::HashSet;
use std::fmt;

/// Decides which property values are stored as compressed text.
pub trait PropertyCacheCompression: Send + Sync + fmt::Debug {
    fn is_compressed(&self, content: &dyn ContentSource, alias: &str, published: bool) -> bool;

    /// Text shorter than this is stored plain even when compressible.
    fn min_value_bytes(&self) -> usize {
        0
    }
}

/// Never compresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPropertyCompression;

impl PropertyCacheCompression for NoPropertyCompression {
    fn is_compressed(&self, _content: &dyn ContentSource, _alias: &str, _published: bool) -> bool {
        false
    }
}

/// Compresses properties whose editor alias is configured.
#[derive(Debug, Clone, Default)]
pub struct EditorPropertyCompression {
    editors: HashSet<String>,
    min_value_bytes: usize,
}

impl EditorPropertyCompression {
    pub fn new<I, S>(editors: I, min_value_bytes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            editors: editors
                .into_iter()
                .map(|e| fold_case(e.as_ref()).into_owned())
                .collect(),
            min_value_bytes,
        }
    }

    pub fn from_settings(settings: &CompressionSettings) -> Self {
        Self::new(&settings.compressed_editors, settings.min_value_bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }
}

impl PropertyCacheCompression for EditorPropertyCompression {
    fn is_compressed(&self, content: &dyn ContentSource, alias: &str, _published: bool) -> bool {
        content
            .property_editor_alias(alias)
            .is_some_and(|editor| self.editors.contains(&*fold_case(editor)))
    }

    fn min_value_bytes(&self) -> usize {
        self.min_value_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_test_utils::fixtures;

    #[test]
    fn test_editor_match_ignores_case() {
        let article = fixtures::multi_culture_article();
        let policy = EditorPropertyCompression::new(["umbraco.richtext"], 16);
        assert!(policy.is_compressed(&article, "bodyText", true));
        assert!(policy.is_compressed(&article, "BODYTEXT", false));
        assert!(!policy.is_compressed(&article, "title", true));
        assert!(!policy.is_compressed(&article, "unknown", true));
        assert_eq!(policy.min_value_bytes(), 16);
    }

    #[test]
    fn test_noop_never_compresses() {
        let article = fixtures::multi_culture_article();
        assert!(!NoPropertyCompression.is_compressed(&article, "bodyText", true));
    }
}
