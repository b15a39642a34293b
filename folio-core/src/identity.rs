//! Identity types for cached content nodes

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use uuid::Uuid;

/// Integer node identifier assigned by the content store.
pub type NodeId = i32;

/// Stable node key, shared by every instance of the application.
pub type NodeKey = Uuid;

/// Integer identifier of a content, media or member type.
pub type ContentTypeId = i32;

/// Integer identifier of a back-office user.
pub type UserId = i32;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Culture code used for invariant values ("no culture").
pub const INVARIANT_CULTURE: &str = "";

/// Segment used for unsegmented values.
pub const NO_SEGMENT: &str = "";

/// Generate a new random node key.
pub fn new_node_key() -> NodeKey {
    Uuid::new_v4()
}

/// Case-insensitive equality of aliases and culture codes, using full
/// Unicode lower-casing.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.is_ascii() && b.is_ascii() {
        return a.eq_ignore_ascii_case(b);
    }
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Canonical lower-case form: equal for exactly the strings
/// [`eq_ignore_case`] treats as equal.
pub fn fold_case(s: &str) -> Cow<'_, str> {
    if s.is_ascii() {
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(s.to_ascii_lowercase())
        } else {
            Cow::Borrowed(s)
        }
    } else {
        Cow::Owned(s.chars().flat_map(char::to_lowercase).collect())
    }
}
