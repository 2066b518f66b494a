//! grant domain types: grant types, requests, and queryable state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::posture::PostureAttribute;
use crate::tag::Tag;

/// how risky a grant type is, which controls the approval path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// auto-approved, no human in the loop.
    #[default]
    Low,
    /// requires a human approval.
    Medium,
    /// requires a human approval.
    High,
}

impl RiskLevel {
    /// whether grants of this risk level need a human decision.
    pub fn requires_approval(self) -> bool {
        self > RiskLevel::Low
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{s}")
    }
}

/// the effect a grant applies while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrantAction {
    /// add tags and posture attributes to a device.
    #[default]
    Tag,
    /// temporarily elevate a user's role.
    UserRole,
    /// temporarily restore a suspended user.
    UserRestore,
}

/// the closed set of roles a user-role grant may elevate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    /// tailnet owner.
    Owner,
    /// regular member.
    Member,
    /// full admin.
    Admin,
    /// IT admin.
    ItAdmin,
    /// network admin.
    NetworkAdmin,
    /// billing admin.
    BillingAdmin,
    /// read-only auditor.
    Auditor,
}

impl UserRole {
    /// the wire string for the control-plane API.
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Owner => "owner",
            UserRole::Member => "member",
            UserRole::Admin => "admin",
            UserRole::ItAdmin => "it-admin",
            UserRole::NetworkAdmin => "network-admin",
            UserRole::BillingAdmin => "billing-admin",
            UserRole::Auditor => "auditor",
        }
    }

    /// parse a role from its wire string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(UserRole::Owner),
            "member" => Some(UserRole::Member),
            "admin" => Some(UserRole::Admin),
            "it-admin" => Some(UserRole::ItAdmin),
            "network-admin" => Some(UserRole::NetworkAdmin),
            "billing-admin" => Some(UserRole::BillingAdmin),
            "auditor" => Some(UserRole::Auditor),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// a validated grant type, loaded from config at startup and immutable at
/// runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantType {
    /// unique identifier.
    pub name: String,
    /// human-readable description.
    pub description: String,
    /// the effect this grant applies.
    pub action: GrantAction,
    /// tags assigned while active (Tag action).
    pub tags: Vec<Tag>,
    /// posture attributes set while active (Tag action).
    pub posture_attributes: Vec<PostureAttribute>,
    /// role elevated to (UserRole action).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    /// longest a single grant may be held.
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    /// risk level controlling the approval path.
    pub risk_level: RiskLevel,
    /// identities allowed to approve (Medium/High risk).
    pub approvers: Vec<String>,
}

impl GrantType {
    /// short human-readable description of the configured effect.
    pub fn action_summary(&self) -> String {
        match self.action {
            GrantAction::Tag => format!(
                "{} tags, {} posture attributes",
                self.tags.len(),
                self.posture_attributes.len()
            ),
            GrantAction::UserRole => match self.role {
                Some(role) => format!("role {role}"),
                None => "role".to_string(),
            },
            GrantAction::UserRestore => "user restore".to_string(),
        }
    }
}

/// immutable input for a grant lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    /// opaque unique id (uuid).
    pub id: String,
    /// identity of the requesting caller.
    pub requester: String,
    /// stable id of the device the request was made from.
    pub requester_device_id: String,
    /// name of the grant type being requested.
    pub grant_type_name: String,
    /// target device (Tag action).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device_id: Option<String>,
    /// target user (user actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
    /// how long the grant is held; at most the grant type's max duration.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// free-form justification.
    pub reason: String,
    /// when the request was made.
    pub requested_at: DateTime<Utc>,
}

/// lifecycle status of a grant.
///
/// serialized names are a stable wire contract observed by external UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// waiting on the approval gate.
    PendingApproval,
    /// effect applied, timer running.
    Active,
    /// timer fired, effect reverted.
    Expired,
    /// explicitly revoked before expiry.
    Revoked,
    /// denied by an approver or by timeout.
    Denied,
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GrantStatus::PendingApproval => "pending_approval",
            GrantStatus::Active => "active",
            GrantStatus::Expired => "expired",
            GrantStatus::Revoked => "revoked",
            GrantStatus::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

/// evolving, queryable state of a grant lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantState {
    /// the immutable request.
    pub request: GrantRequest,
    /// current lifecycle status.
    pub status: GrantStatus,
    /// who approved the grant, if anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// who denied the grant, if anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,
    /// why the grant was denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
    /// when the effect was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// when the grant is due to expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// who revoked the grant, if anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    /// when the grant was revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// the user's role before elevation (UserRole action reversal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_role: Option<UserRole>,
}

impl GrantState {
    /// initial state for a new request.
    pub fn new(request: GrantRequest) -> Self {
        Self {
            request,
            status: GrantStatus::PendingApproval,
            approved_by: None,
            denied_by: None,
            deny_reason: None,
            activated_at: None,
            expires_at: None,
            revoked_by: None,
            revoked_at: None,
            original_role: None,
        }
    }
}

/// the assets a single grant holds on a device, tracked by the device tag
/// manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GrantAssets {
    /// tags this grant assigns.
    pub tags: Vec<Tag>,
    /// posture attributes this grant sets.
    #[serde(default)]
    pub posture_attributes: Vec<PostureAttribute>,
    /// the requesting device, for requester-scoped posture attributes.
    #[serde(default)]
    pub requester_device_id: String,
}
