//! grant-assignable tag labels.
//!
//! a [`Tag`] is the capability label the static ACL keys on. The control
//! plane only accepts labels of the form `tag:<name>`, where the name opens
//! with a letter and continues with letters, digits, or dashes. The
//! constructor enforces exactly that, so everything downstream can treat a
//! `Tag` as known-good and compare it as a plain string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// upper bound on the name portion of a tag.
pub const MAX_TAG_NAME_LEN: usize = 63;

/// a tag label proven to be in control-plane form.
///
/// ```
/// use tailgrant_types::Tag;
///
/// let tag: Tag = "tag:prod-access".parse().unwrap();
/// assert_eq!(tag.as_str(), "tag:prod-access");
/// assert!("prod-access".parse::<Tag>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// validate `s` as a tag label.
    pub fn new(s: impl Into<String>) -> Result<Self, TagError> {
        let s = s.into();
        let name = s.strip_prefix("tag:").ok_or(TagError::MissingPrefix)?;

        if name.is_empty() {
            return Err(TagError::EmptyName);
        }
        if name.len() > MAX_TAG_NAME_LEN {
            return Err(TagError::NameTooLong(name.len()));
        }

        let mut chars = name.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(TagError::BadLeadingChar);
        }
        if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
            return Err(TagError::BadChar(c));
        }

        Ok(Self(s))
    }

    /// the full `tag:`-prefixed label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

// deserialization goes through the constructor, so a malformed tag in a
// config document or request body fails at the parse boundary
impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Tag::new(String::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

/// why a string was rejected as a tag label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// no `tag:` prefix.
    #[error("tag must start with 'tag:'")]
    MissingPrefix,
    /// nothing after the prefix.
    #[error("tag name cannot be empty")]
    EmptyName,
    /// name longer than [`MAX_TAG_NAME_LEN`].
    #[error("tag name too long ({0} chars, max {MAX_TAG_NAME_LEN})")]
    NameTooLong(usize),
    /// name does not open with a letter.
    #[error("tag name must start with a letter")]
    BadLeadingChar,
    /// name contains something other than letters, digits, or dashes.
    #[error("invalid character {0:?} in tag name (letters, digits, dashes only)")]
    BadChar(char),
}
