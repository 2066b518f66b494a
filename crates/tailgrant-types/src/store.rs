//! the grant type store: validated, immutable grant types keyed by name.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::config::GrantTypeConfig;
use crate::error::ConfigError;
use crate::grant::{GrantAction, GrantType};
use crate::posture::PostureKey;
use crate::tag::Tag;

/// immutable store of validated grant types, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct GrantTypeStore {
    types: HashMap<String, GrantType>,
    order: Vec<String>,
}

impl GrantTypeStore {
    /// build the store from config, enforcing cross-field rules:
    /// - names are unique
    /// - tag actions assign at least one tag or posture attribute
    /// - posture attribute values are non-null
    /// - user_role actions carry a role
    /// - medium/high risk types have at least one approver
    /// - max duration is positive
    pub fn new(configs: Vec<GrantTypeConfig>) -> Result<Self, ConfigError> {
        let mut store = Self {
            types: HashMap::with_capacity(configs.len()),
            order: Vec::with_capacity(configs.len()),
        };

        for c in configs {
            if c.max_duration == Duration::ZERO {
                return Err(ConfigError::NonPositiveDuration(c.name));
            }

            match c.action {
                GrantAction::Tag => {
                    if c.tags.is_empty() && c.posture_attributes.is_empty() {
                        return Err(ConfigError::EmptyTagAction(c.name));
                    }
                    for pa in &c.posture_attributes {
                        if pa.value.is_null() {
                            return Err(ConfigError::NullPostureValue {
                                grant_type: c.name,
                                key: pa.key.to_string(),
                            });
                        }
                    }
                }
                GrantAction::UserRole => {
                    if c.role.is_none() {
                        return Err(ConfigError::MissingRole(c.name));
                    }
                }
                GrantAction::UserRestore => {}
            }

            if c.risk_level.requires_approval() && c.approvers.is_empty() {
                return Err(ConfigError::MissingApprovers(c.name));
            }

            let gt = GrantType {
                name: c.name,
                description: c.description,
                action: c.action,
                tags: c.tags,
                posture_attributes: c.posture_attributes,
                role: c.role,
                max_duration: c.max_duration,
                risk_level: c.risk_level,
                approvers: c.approvers,
            };

            if store.types.contains_key(&gt.name) {
                return Err(ConfigError::DuplicateGrantType(gt.name));
            }

            store.order.push(gt.name.clone());
            store.types.insert(gt.name.clone(), gt);
        }

        Ok(store)
    }

    /// look up a grant type by name.
    pub fn get(&self, name: &str) -> Option<&GrantType> {
        self.types.get(name)
    }

    /// all grant types in config order.
    pub fn list(&self) -> Vec<&GrantType> {
        self.order
            .iter()
            .filter_map(|name| self.types.get(name))
            .collect()
    }

    /// the union of all tags any grant type can assign. This is what
    /// partitions device tags into grant-managed vs external.
    pub fn grant_tags(&self) -> BTreeSet<Tag> {
        self.types
            .values()
            .flat_map(|gt| gt.tags.iter().cloned())
            .collect()
    }

    /// the union of all posture keys any grant type can set.
    pub fn grant_posture_keys(&self) -> BTreeSet<PostureKey> {
        self.types
            .values()
            .flat_map(|gt| gt.posture_attributes.iter().map(|pa| pa.key.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::RiskLevel;

    fn tag_config(name: &str, tags: &[&str]) -> GrantTypeConfig {
        serde_yaml::from_str(&format!(
            "name: {name}\ntags: [{}]\nmaxDuration: 1h\n",
            tags.iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .unwrap()
    }

    #[test]
    fn test_store_lookup_and_order() {
        let store = GrantTypeStore::new(vec![
            tag_config("b-type", &["tag:b"]),
            tag_config("a-type", &["tag:a"]),
        ])
        .unwrap();

        assert!(store.get("a-type").is_some());
        assert!(store.get("missing").is_none());

        // list preserves config order, not alphabetical
        let names: Vec<_> = store.list().iter().map(|gt| gt.name.as_str()).collect();
        assert_eq!(names, vec!["b-type", "a-type"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = GrantTypeStore::new(vec![
            tag_config("same", &["tag:a"]),
            tag_config("same", &["tag:b"]),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateGrantType(_))));
    }

    #[test]
    fn test_empty_tag_action_rejected() {
        let config: GrantTypeConfig =
            serde_yaml::from_str("name: empty\nmaxDuration: 1h\n").unwrap();
        let result = GrantTypeStore::new(vec![config]);
        assert!(matches!(result, Err(ConfigError::EmptyTagAction(_))));
    }

    #[test]
    fn test_missing_approvers_rejected() {
        let config: GrantTypeConfig =
            serde_yaml::from_str("name: risky\ntags: [\"tag:a\"]\nmaxDuration: 1h\nriskLevel: high\n")
                .unwrap();
        assert_eq!(config.risk_level, RiskLevel::High);
        let result = GrantTypeStore::new(vec![config]);
        assert!(matches!(result, Err(ConfigError::MissingApprovers(_))));
    }

    #[test]
    fn test_missing_role_rejected() {
        let config: GrantTypeConfig =
            serde_yaml::from_str("name: elevate\naction: user_role\nmaxDuration: 1h\n").unwrap();
        let result = GrantTypeStore::new(vec![config]);
        assert!(matches!(result, Err(ConfigError::MissingRole(_))));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let config: GrantTypeConfig =
            serde_yaml::from_str("name: zero\ntags: [\"tag:a\"]\nmaxDuration: 0s\n").unwrap();
        let result = GrantTypeStore::new(vec![config]);
        assert!(matches!(result, Err(ConfigError::NonPositiveDuration(_))));
    }

    #[test]
    fn test_null_posture_value_rejected() {
        let config: GrantTypeConfig = serde_yaml::from_str(
            "name: posture\npostureAttributes:\n  - key: \"custom:tier\"\n    value: null\nmaxDuration: 1h\n",
        )
        .unwrap();
        let result = GrantTypeStore::new(vec![config]);
        assert!(matches!(result, Err(ConfigError::NullPostureValue { .. })));
    }

    #[test]
    fn test_user_restore_needs_no_extra_config() {
        let config: GrantTypeConfig =
            serde_yaml::from_str("name: restore\naction: user_restore\nmaxDuration: 1h\n").unwrap();
        let store = GrantTypeStore::new(vec![config]).unwrap();
        assert!(store.get("restore").is_some());
    }

    #[test]
    fn test_grant_tag_and_posture_unions() {
        let a = tag_config("a", &["tag:shared", "tag:a"]);
        let b: GrantTypeConfig = serde_yaml::from_str(
            "name: b\ntags: [\"tag:shared\", \"tag:b\"]\npostureAttributes:\n  - key: \"custom:tier\"\n    value: gold\nmaxDuration: 1h\n",
        )
        .unwrap();
        let store = GrantTypeStore::new(vec![a, b]).unwrap();

        let tags: Vec<String> = store.grant_tags().iter().map(|t| t.to_string()).collect();
        assert_eq!(tags, vec!["tag:a", "tag:b", "tag:shared"]);

        let keys: Vec<String> = store
            .grant_posture_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["custom:tier"]);
    }
}
