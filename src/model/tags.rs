//! Tag normalisation and `key:value` attribute extraction.
//!
//! Engines hand over tags in whatever form they use (with or without a
//! leading `@`, padded, empty). [`normalize_tags`] turns them into plain
//! strings once, at the boundary; [`parse_attributes`] then derives backend
//! attributes from the `key:value` convention.

use serde::{Deserialize, Serialize};

/// Key/value attribute attached to an item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute key.
    pub key: String,
    /// Attribute value.
    pub value: String,
    /// Set for attributes the reporter adds itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
}

impl Attribute {
    /// Create a user attribute.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            system: false,
        }
    }

    /// Create a system attribute.
    pub fn system(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: true,
            ..Self::new(key, value)
        }
    }

    /// Parse a single `key:value` tag.
    ///
    /// The value may itself contain colons. Tags without a colon, or with an
    /// empty key or value, yield `None`.
    ///
    /// ```
    /// use reportwire::model::Attribute;
    ///
    /// let attribute = Attribute::from_tag("url:https://example.test").expect("valid tag");
    /// assert_eq!(attribute.key, "url");
    /// assert_eq!(attribute.value, "https://example.test");
    /// assert!(Attribute::from_tag("smoke").is_none());
    /// assert!(Attribute::from_tag(":orphan").is_none());
    /// ```
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let (key, value) = tag.split_once(':')?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self::new(key, value))
    }
}

/// Normalise engine tags to plain strings.
///
/// Strips surrounding whitespace and a single leading `@`, dropping tags that
/// end up empty.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|tag| {
            let tag = tag.as_ref().trim();
            let tag = tag.strip_prefix('@').unwrap_or(tag).trim();
            (!tag.is_empty()).then(|| tag.to_owned())
        })
        .collect()
}

/// Derive attributes from normalised tags, dropping malformed ones.
#[must_use]
pub fn parse_attributes(tags: &[String]) -> Vec<Attribute> {
    tags.iter().filter_map(|tag| Attribute::from_tag(tag)).collect()
}
