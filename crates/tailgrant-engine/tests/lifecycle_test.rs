//! end-to-end tests for the grant lifecycle: activation, expiry, approval
//! gating, revocation, extension, and user actions.

mod common;

use std::time::Duration;

use common::*;
use tailgrant_engine::{EngineError, approval_run_id, grant_run_id};
use tailgrant_engine::test_utils::FakeResourceClient;
use tailgrant_types::{ApproveSignal, DenySignal, ExtendSignal, GrantStatus, RevokeSignal, UserRole};

#[tokio::test]
async fn low_risk_grant_applies_and_expires() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &["tag:server"]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "read", "node-1", Duration::from_millis(300)))
        .await
        .unwrap();

    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    assert!(state.approved_by.is_none(), "low risk needs no approver");
    wait_for("grant tag application", || {
        client.device_tags("node-1") == vec!["tag:read", "tag:server"]
    })
    .await;

    let state = wait_for_status(&rt, "g1", GrantStatus::Expired).await;
    wait_for("grant tag removal", || {
        client.device_tags("node-1") == vec!["tag:server"]
    })
    .await;

    // duration honored: expiry was scheduled exactly duration after activation
    let activated = state.activated_at.unwrap();
    let expires = state.expires_at.unwrap();
    assert_eq!((expires - activated).to_std().unwrap(), Duration::from_millis(300));
}

#[tokio::test]
async fn high_risk_grant_waits_for_approval() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "admin", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();

    wait_for_status(&rt, "g1", GrantStatus::PendingApproval).await;
    // nothing applied while pending
    assert!(client.device_tags("node-1").is_empty());

    rt.signal(
        &approval_run_id("g1"),
        tailgrant_engine::SIGNAL_APPROVE,
        &ApproveSignal {
            approved_by: "approver@example.com".to_string(),
        },
    )
    .await
    .unwrap();

    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    assert_eq!(state.approved_by.as_deref(), Some("approver@example.com"));
    wait_for("grant tag application", || {
        client.device_tags("node-1") == vec!["tag:admin"]
    })
    .await;
}

#[tokio::test]
async fn self_approval_does_not_consume_the_gate() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "admin", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::PendingApproval).await;

    // the requester tries to approve their own grant
    rt.signal(
        &approval_run_id("g1"),
        tailgrant_engine::SIGNAL_APPROVE,
        &ApproveSignal {
            approved_by: "alice@example.com".to_string(),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = rt.grant_state("g1").await.unwrap().unwrap();
    assert_eq!(state.status, GrantStatus::PendingApproval);

    // a real approver still can
    rt.signal(
        &approval_run_id("g1"),
        tailgrant_engine::SIGNAL_APPROVE,
        &ApproveSignal {
            approved_by: "approver@example.com".to_string(),
        },
    )
    .await
    .unwrap();
    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    assert_eq!(state.approved_by.as_deref(), Some("approver@example.com"));
}

#[tokio::test]
async fn non_approver_is_rejected() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "admin", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::PendingApproval).await;

    rt.signal(
        &approval_run_id("g1"),
        tailgrant_engine::SIGNAL_APPROVE,
        &ApproveSignal {
            approved_by: "random@example.com".to_string(),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        rt.grant_state("g1").await.unwrap().unwrap().status,
        GrantStatus::PendingApproval
    );
}

#[tokio::test]
async fn denial_skips_activation_and_reversal() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "admin", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::PendingApproval).await;

    rt.signal(
        &approval_run_id("g1"),
        tailgrant_engine::SIGNAL_DENY,
        &DenySignal {
            denied_by: "approver@example.com".to_string(),
            reason: "not during the incident".to_string(),
        },
    )
    .await
    .unwrap();

    let state = wait_for_status(&rt, "g1", GrantStatus::Denied).await;
    assert_eq!(state.denied_by.as_deref(), Some("approver@example.com"));
    assert_eq!(state.deny_reason.as_deref(), Some("not during the incident"));
    // the device was never touched
    assert!(client.set_tags_calls("node-1").is_empty());
}

#[tokio::test]
async fn revoke_mid_flight_reverts_immediately() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &["tag:server"]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "read", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Active).await;

    rt.signal(
        &grant_run_id("g1"),
        tailgrant_engine::SIGNAL_REVOKE,
        &RevokeSignal {
            revoked_by: "ops@example.com".to_string(),
            reason: "access no longer needed".to_string(),
        },
    )
    .await
    .unwrap();

    let state = wait_for_status(&rt, "g1", GrantStatus::Revoked).await;
    assert_eq!(state.revoked_by.as_deref(), Some("ops@example.com"));
    assert!(state.revoked_at.is_some());
    wait_for("grant tag removal", || {
        client.device_tags("node-1") == vec!["tag:server"]
    })
    .await;
}

#[tokio::test]
async fn extend_clamps_to_max_duration() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    // "short" caps at 2 seconds
    rt.start_grant(device_request("g1", "short", "node-1", Duration::from_millis(500)))
        .await
        .unwrap();
    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    let activated = state.activated_at.unwrap();

    let original_expiry = state.expires_at.unwrap();
    rt.signal(
        &grant_run_id("g1"),
        tailgrant_engine::SIGNAL_EXTEND,
        &ExtendSignal {
            extended_by: "alice@example.com".to_string(),
            duration: Duration::from_secs(600),
        },
    )
    .await
    .unwrap();

    // poll until the extension is visible in queryable state
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let state = loop {
        let state = rt.grant_state("g1").await.unwrap().unwrap();
        if state.expires_at.unwrap() != original_expiry || state.status != GrantStatus::Active {
            break state;
        }
        assert!(tokio::time::Instant::now() < deadline, "extend never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    let max_expiry = activated + chrono::Duration::seconds(2);
    assert!(
        state.expires_at.unwrap() <= max_expiry,
        "expiry {} exceeds activation + maxDuration {}",
        state.expires_at.unwrap(),
        max_expiry
    );

    // the clamped grant still expires on its own
    wait_for_status(&rt, "g1", GrantStatus::Expired).await;
}

#[tokio::test]
async fn duration_of_exactly_max_is_accepted() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "short", "node-1", Duration::from_secs(2)))
        .await
        .unwrap();
    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    let held = (state.expires_at.unwrap() - state.activated_at.unwrap())
        .to_std()
        .unwrap();
    assert_eq!(held, Duration::from_secs(2));
}

#[tokio::test]
async fn user_role_elevation_and_reversal() {
    let client = FakeResourceClient::new();
    client.add_user("u1", "member", "active");
    let rt = new_runtime(&client).await;

    rt.start_grant(user_request("g1", "elevate", "u1", Duration::from_millis(300)))
        .await
        .unwrap();

    let state = wait_for_status(&rt, "g1", GrantStatus::Active).await;
    assert_eq!(state.original_role, Some(UserRole::Member));
    assert_eq!(client.user_role("u1"), "it-admin");

    wait_for_status(&rt, "g1", GrantStatus::Expired).await;
    wait_for("role reversal", || client.user_role("u1") == "member").await;
}

#[tokio::test]
async fn user_restore_and_resuspension() {
    let client = FakeResourceClient::new();
    client.add_user("u1", "member", "suspended");
    let rt = new_runtime(&client).await;

    rt.start_grant(user_request("g1", "reinstate", "u1", Duration::from_millis(300)))
        .await
        .unwrap();

    wait_for_status(&rt, "g1", GrantStatus::Active).await;
    wait_for("restore", || client.user_status("u1") == "active").await;

    wait_for_status(&rt, "g1", GrantStatus::Expired).await;
    wait_for("re-suspension", || client.user_status("u1") == "suspended").await;
}

#[tokio::test]
async fn unknown_grant_type_is_rejected() {
    let client = FakeResourceClient::new();
    let rt = new_runtime(&client).await;

    let err = rt
        .start_grant(device_request("g1", "nope", "node-1", Duration::from_secs(60)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownGrantType(_)));
}

#[tokio::test]
async fn list_grant_states_covers_running_and_completed() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "read", "node-1", Duration::from_millis(200)))
        .await
        .unwrap();
    rt.start_grant(device_request("g2", "read", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();

    wait_for_status(&rt, "g1", GrantStatus::Expired).await;
    wait_for_status(&rt, "g2", GrantStatus::Active).await;

    let states = rt.list_grant_states().await.unwrap();
    assert_eq!(states.len(), 2);
    let ids: Vec<_> = states.iter().map(|s| s.request.id.as_str()).collect();
    assert!(ids.contains(&"g1") && ids.contains(&"g2"));
}
