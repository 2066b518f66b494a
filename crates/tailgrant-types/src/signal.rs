//! workflow signal payloads.
//!
//! signals are named, typed, one-way messages delivered to a running
//! state-machine instance. Payload shapes are a stable wire contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::posture::PostureAttribute;
use crate::tag::Tag;

/// approve a pending grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveSignal {
    /// identity of the approver.
    pub approved_by: String,
}

/// deny a pending grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenySignal {
    /// identity of the denier.
    pub denied_by: String,
    /// why the grant was denied.
    pub reason: String,
}

/// revoke an active grant before expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSignal {
    /// identity of the revoker.
    pub revoked_by: String,
    /// why the grant was revoked.
    pub reason: String,
}

/// extend an active grant. The new duration is measured from receipt and
/// clamped so expiry never exceeds activation + the grant type's max.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendSignal {
    /// identity of the extender.
    pub extended_by: String,
    /// new duration, measured from receipt.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// register a grant's assets with a device tag manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddGrantSignal {
    /// the grant being added.
    pub grant_id: String,
    /// tags the grant assigns.
    pub tags: Vec<Tag>,
    /// posture attributes the grant sets.
    #[serde(default)]
    pub posture_attributes: Vec<PostureAttribute>,
    /// the requesting device, for requester-scoped posture attributes.
    #[serde(default)]
    pub requester_device_id: String,
}

/// release a grant's assets from a device tag manager. Unknown grant ids are
/// a no-op, so redelivery is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveGrantSignal {
    /// the grant being removed.
    pub grant_id: String,
}

/// ask a device tag manager to re-read device state and reapply the desired
/// state. Sent by the reconciler when drift is detected.
///
/// `grant_tags` is the reconciler's set of every grant-manageable tag; the
/// manager strips any of them that no active grant claims. An empty set
/// makes sync purely additive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncSignal {
    /// all tags any grant type may assign.
    #[serde(default)]
    pub grant_tags: std::collections::BTreeSet<String>,
}

/// outcome of an approval gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    /// whether the grant was approved.
    pub approved: bool,
    /// who approved it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// who denied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,
    /// why it was denied or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_signal_duration_string() {
        let json = r#"{"extendedBy": "ops@example.com", "duration": "2h"}"#;
        let sig: ExtendSignal = serde_json::from_str(json).unwrap();
        assert_eq!(sig.duration, Duration::from_secs(2 * 3600));
    }

    #[test]
    fn test_add_grant_signal_defaults() {
        let json = r#"{"grantId": "g1", "tags": ["tag:web"]}"#;
        let sig: AddGrantSignal = serde_json::from_str(json).unwrap();
        assert_eq!(sig.grant_id, "g1");
        assert_eq!(sig.tags.len(), 1);
        assert!(sig.posture_attributes.is_empty());
        assert!(sig.requester_device_id.is_empty());
    }

    #[test]
    fn test_approval_result_skips_empty_fields() {
        let result = ApprovalResult {
            approved: true,
            approved_by: Some("a@example.com".to_string()),
            denied_by: None,
            reason: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("approvedBy"));
        assert!(!json.contains("deniedBy"));
        assert!(!json.contains("reason"));
    }
}
