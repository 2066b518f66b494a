//! shared setup for engine integration tests.

#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use tailgrant_db::TailgrantDb;
use tailgrant_engine::Runtime;
use tailgrant_engine::test_utils::FakeResourceClient;
use tailgrant_types::{GrantRequest, GrantState, GrantStatus, GrantTypeConfig, GrantTypeStore};

/// grant types used across the integration tests.
pub const GRANTS_YAML: &str = r#"
- name: read
  description: read access
  tags: ["tag:read"]
  maxDuration: 4h
- name: short
  tags: ["tag:short"]
  maxDuration: 2s
- name: admin
  tags: ["tag:admin"]
  maxDuration: 4h
  riskLevel: high
  approvers: ["approver@example.com"]
- name: solo
  tags: ["tag:a"]
  maxDuration: 1h
- name: multi
  tags: ["tag:a", "tag:b"]
  maxDuration: 1h
- name: elevate
  action: user_role
  role: it-admin
  maxDuration: 1h
- name: reinstate
  action: user_restore
  maxDuration: 1h
- name: posture
  tags: ["tag:posture"]
  postureAttributes:
    - key: "custom:jit"
      value: "on"
      target: target
    - key: "custom:req"
      value: 1
      target: requester
  maxDuration: 1h
"#;

pub fn store() -> GrantTypeStore {
    let configs: Vec<GrantTypeConfig> = serde_yaml::from_str(GRANTS_YAML).unwrap();
    GrantTypeStore::new(configs).unwrap()
}

/// a runtime over a fresh in-memory database.
pub async fn new_runtime(client: &FakeResourceClient) -> Runtime<FakeResourceClient> {
    let db = TailgrantDb::new_in_memory().await.unwrap();
    runtime_over(db, client)
}

/// a runtime over an existing database (restart simulation).
pub fn runtime_over(db: TailgrantDb, client: &FakeResourceClient) -> Runtime<FakeResourceClient> {
    Runtime::new(db, client.clone(), store(), Duration::from_secs(300))
}

/// a device-targeting grant request.
pub fn device_request(id: &str, grant_type: &str, device: &str, duration: Duration) -> GrantRequest {
    GrantRequest {
        id: id.to_string(),
        requester: "alice@example.com".to_string(),
        requester_device_id: "node-alice".to_string(),
        grant_type_name: grant_type.to_string(),
        target_device_id: Some(device.to_string()),
        target_user_id: None,
        duration,
        reason: "integration test".to_string(),
        requested_at: Utc::now(),
    }
}

/// a user-targeting grant request.
pub fn user_request(id: &str, grant_type: &str, user: &str, duration: Duration) -> GrantRequest {
    GrantRequest {
        id: id.to_string(),
        requester: "alice@example.com".to_string(),
        requester_device_id: "node-alice".to_string(),
        grant_type_name: grant_type.to_string(),
        target_device_id: None,
        target_user_id: Some(user.to_string()),
        duration,
        reason: "integration test".to_string(),
        requested_at: Utc::now(),
    }
}

/// poll until the grant reaches `status` or panic after 10 seconds.
pub async fn wait_for_status(
    rt: &Runtime<FakeResourceClient>,
    grant_id: &str,
    status: GrantStatus,
) -> GrantState {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(state) = rt.grant_state(grant_id).await.unwrap() {
            if state.status == status {
                return state;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for grant {grant_id} to reach {status}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// poll until `cond` holds or panic after 10 seconds.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
