//! posture attribute types for grant-managed device attributes.
//!
//! grants may set custom posture attributes on devices; the ACL engine uses
//! them for fine-grained conditions. Only the `custom:` namespace is writable
//! through the control-plane API, so grant-managed keys are validated to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// a validated posture attribute key in the `custom:` namespace.
///
/// # Example
/// ```
/// use tailgrant_types::PostureKey;
///
/// let key: PostureKey = "custom:jit-tier".parse().unwrap();
/// assert_eq!(key.name(), "jit-tier");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostureKey(String);

impl PostureKey {
    /// create a new posture key, validating the `custom:` namespace.
    pub fn new(s: impl Into<String>) -> Result<Self, PostureKeyError> {
        let s = s.into();
        let Some(name) = s.strip_prefix("custom:") else {
            return Err(PostureKeyError::MissingPrefix);
        };
        if name.is_empty() {
            return Err(PostureKeyError::EmptyName);
        }
        Ok(Self(s))
    }

    /// get the full key string (e.g., "custom:jit-tier").
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// get the name portion after the `custom:` prefix.
    pub fn name(&self) -> &str {
        &self.0[7..]
    }
}

impl AsRef<str> for PostureKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PostureKey {
    type Err = PostureKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for PostureKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PostureKey::new(s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for PostureKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// error type for posture key validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostureKeyError {
    /// key must start with "custom:".
    #[error("posture attribute key must start with 'custom:'")]
    MissingPrefix,
    /// key name cannot be empty.
    #[error("posture attribute key name cannot be empty")]
    EmptyName,
}

/// which device a posture attribute is scoped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostureTarget {
    /// the device the request was made from.
    #[default]
    Requester,
    /// the grant's target device.
    Target,
}

/// a posture attribute a grant sets while active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostureAttribute {
    /// attribute key (`custom:` namespace).
    pub key: PostureKey,
    /// attribute value (string, number, or bool).
    pub value: serde_json::Value,
    /// which device the attribute is applied to.
    #[serde(default)]
    pub target: PostureTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(PostureKey::new("custom:tier").is_ok());
        assert!(PostureKey::new("custom:jit-access").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert_eq!(
            PostureKey::new("tier").unwrap_err(),
            PostureKeyError::MissingPrefix
        );
        assert_eq!(
            PostureKey::new("node:os").unwrap_err(),
            PostureKeyError::MissingPrefix
        );
        assert_eq!(
            PostureKey::new("custom:").unwrap_err(),
            PostureKeyError::EmptyName
        );
    }

    #[test]
    fn test_target_default_is_requester() {
        let json = r#"{"key": "custom:tier", "value": "gold"}"#;
        let pa: PostureAttribute = serde_json::from_str(json).unwrap();
        assert_eq!(pa.target, PostureTarget::Requester);
    }

    #[test]
    fn test_target_serde() {
        let json = r#"{"key": "custom:tier", "value": 3, "target": "target"}"#;
        let pa: PostureAttribute = serde_json::from_str(json).unwrap();
        assert_eq!(pa.target, PostureTarget::Target);
        assert_eq!(pa.value, serde_json::json!(3));

        let out = serde_json::to_string(&pa).unwrap();
        assert!(out.contains("\"target\":\"target\""));
    }
}
