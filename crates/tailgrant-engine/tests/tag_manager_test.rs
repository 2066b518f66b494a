//! end-to-end tests for the device tag manager: concurrent grants on a
//! shared device, shared tags, posture attributes, and history compaction.

mod common;

use std::time::Duration;

use common::*;
use tailgrant_db::WorkflowStore;
use tailgrant_engine::tag_manager::{CONTINUE_AS_NEW_THRESHOLD, DeviceTagManagerState};
use tailgrant_engine::test_utils::FakeResourceClient;
use tailgrant_engine::{SIGNAL_REMOVE_GRANT, SIGNAL_REVOKE, device_run_id, grant_run_id};
use tailgrant_types::{AddGrantSignal, GrantStatus, RemoveGrantSignal, RevokeSignal, Tag};

fn revoke() -> RevokeSignal {
    RevokeSignal {
        revoked_by: "ops@example.com".to_string(),
        reason: "test".to_string(),
    }
}

#[tokio::test]
async fn concurrent_grants_share_a_device() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &["tag:external"]);
    let rt = new_runtime(&client).await;

    // G1 assigns [tag:a], G2 assigns [tag:a, tag:b]
    rt.start_grant(device_request("g1", "solo", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    rt.start_grant(device_request("g2", "multi", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();

    wait_for_status(&rt, "g1", GrantStatus::Active).await;
    wait_for_status(&rt, "g2", GrantStatus::Active).await;
    wait_for("both grants applied", || {
        client.device_tags("node-1") == vec!["tag:a", "tag:b", "tag:external"]
    })
    .await;

    // removing G1 keeps tag:a (shared with G2) and tag:b
    rt.signal(&grant_run_id("g1"), SIGNAL_REVOKE, &revoke()).await.unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Revoked).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        client.device_tags("node-1"),
        vec!["tag:a", "tag:b", "tag:external"]
    );

    // removing G2 strips all grant tags; the external tag survives
    rt.signal(&grant_run_id("g2"), SIGNAL_REVOKE, &revoke()).await.unwrap();
    wait_for_status(&rt, "g2", GrantStatus::Revoked).await;
    wait_for("all grant tags removed", || {
        client.device_tags("node-1") == vec!["tag:external"]
    })
    .await;

    // with no grants left, the manager exits
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !rt.exists_running(&device_run_id("node-1")).await.unwrap() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "manager never exited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn manager_restarts_for_a_new_grant_after_exit() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "read", "node-1", Duration::from_millis(200)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Expired).await;
    wait_for("manager exit after expiry", || {
        client.device_tags("node-1").is_empty()
    })
    .await;

    // a later grant on the same device gets a fresh manager generation
    rt.start_grant(device_request("g2", "read", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g2", GrantStatus::Active).await;
    wait_for("second generation applies tags", || {
        client.device_tags("node-1") == vec!["tag:read"]
    })
    .await;
}

#[tokio::test]
async fn remove_for_unknown_grant_is_a_noop() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "solo", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Active).await;
    wait_for("tag applied", || client.device_tags("node-1") == vec!["tag:a"]).await;

    rt.signal(
        &device_run_id("node-1"),
        SIGNAL_REMOVE_GRANT,
        &RemoveGrantSignal {
            grant_id: "never-existed".to_string(),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.device_tags("node-1"), vec!["tag:a"]);
    assert!(rt.exists_running(&device_run_id("node-1")).await.unwrap());
}

#[tokio::test]
async fn add_grant_with_existing_id_is_a_replace() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    let first = AddGrantSignal {
        grant_id: "g1".to_string(),
        tags: vec![Tag::new("tag:a").unwrap()],
        posture_attributes: vec![],
        requester_device_id: String::new(),
    };
    rt.signal_with_start_device_manager("node-1", &first).await.unwrap();
    wait_for("first add applied", || client.device_tags("node-1") == vec!["tag:a"]).await;

    let replacement = AddGrantSignal {
        tags: vec![Tag::new("tag:b").unwrap()],
        ..first
    };
    rt.signal_with_start_device_manager("node-1", &replacement).await.unwrap();

    wait_for("replacement applied", || {
        client.device_tags("node-1").contains(&"tag:b".to_string())
    })
    .await;
    let grants = rt.device_manager_grants("node-1").await.unwrap().unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants["g1"].tags, vec![Tag::new("tag:b").unwrap()]);
}

#[tokio::test]
async fn posture_attributes_follow_their_scope() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    client.add_device("node-alice", &[]);
    let rt = new_runtime(&client).await;

    rt.start_grant(device_request("g1", "posture", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Active).await;

    // target-scoped key lands on the target, requester-scoped on the caller
    wait_for("posture application", || {
        client.device_attributes("node-1").contains_key("custom:jit")
            && client.device_attributes("node-alice").contains_key("custom:req")
    })
    .await;

    rt.signal(&grant_run_id("g1"), SIGNAL_REVOKE, &revoke()).await.unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Revoked).await;
    wait_for("posture removal", || {
        client.device_attributes("node-1").is_empty()
            && client.device_attributes("node-alice").is_empty()
    })
    .await;
}

#[tokio::test]
async fn shared_posture_attributes_survive_one_removal() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    client.add_device("node-alice", &[]);
    let rt = new_runtime(&client).await;

    // two posture grants from the same requester on the same target claim
    // identical (device, key) pairs
    rt.start_grant(device_request("g1", "posture", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    rt.start_grant(device_request("g2", "posture", "node-1", Duration::from_secs(3600)))
        .await
        .unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Active).await;
    wait_for_status(&rt, "g2", GrantStatus::Active).await;
    wait_for("posture application", || {
        client.device_attributes("node-1").contains_key("custom:jit")
    })
    .await;

    rt.signal(&grant_run_id("g1"), SIGNAL_REVOKE, &revoke()).await.unwrap();
    wait_for_status(&rt, "g1", GrantStatus::Revoked).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    // still claimed by g2
    assert!(client.device_attributes("node-1").contains_key("custom:jit"));
    assert!(client.device_attributes("node-alice").contains_key("custom:req"));

    rt.signal(&grant_run_id("g2"), SIGNAL_REVOKE, &revoke()).await.unwrap();
    wait_for_status(&rt, "g2", GrantStatus::Revoked).await;
    wait_for("posture removal after last grant", || {
        client.device_attributes("node-1").is_empty()
            && client.device_attributes("node-alice").is_empty()
    })
    .await;
}

#[tokio::test]
async fn signal_threshold_compacts_history_without_visible_effect() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    // a keeper grant holds the manager open
    let keeper = AddGrantSignal {
        grant_id: "keeper".to_string(),
        tags: vec![Tag::new("tag:keep").unwrap()],
        posture_attributes: vec![],
        requester_device_id: String::new(),
    };
    rt.signal_with_start_device_manager("node-1", &keeper).await.unwrap();

    let run_id = device_run_id("node-1");
    let pairs = CONTINUE_AS_NEW_THRESHOLD / 2;
    for i in 0..=pairs {
        let add = AddGrantSignal {
            grant_id: format!("tmp-{i}"),
            tags: vec![Tag::new("tag:a").unwrap()],
            posture_attributes: vec![],
            requester_device_id: String::new(),
        };
        rt.signal_with_start_device_manager("node-1", &add).await.unwrap();
        rt.signal(
            &run_id,
            SIGNAL_REMOVE_GRANT,
            &RemoveGrantSignal {
                grant_id: format!("tmp-{i}"),
            },
        )
        .await
        .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        if rt.db().pending_signal_count(&run_id).await.unwrap() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // the threshold was crossed, so the processed counter was reset and
    // consumed history pruned; the keeper's tag is untouched
    let run = rt.db().get_run(&run_id).await.unwrap().unwrap();
    let state: DeviceTagManagerState = serde_json::from_str(&run.state).unwrap();
    assert!(state.signals_processed < CONTINUE_AS_NEW_THRESHOLD);
    assert_eq!(state.active_grants.len(), 1);
    assert_eq!(client.device_tags("node-1"), vec!["tag:keep"]);
}

#[tokio::test]
async fn set_tags_calls_are_totally_ordered_per_device() {
    let client = FakeResourceClient::new();
    client.add_device("node-1", &[]);
    let rt = new_runtime(&client).await;

    for i in 0..10 {
        rt.start_grant(device_request(
            &format!("g{i}"),
            "multi",
            "node-1",
            Duration::from_secs(3600),
        ))
        .await
        .unwrap();
    }
    for i in 0..10 {
        wait_for_status(&rt, &format!("g{i}"), GrantStatus::Active).await;
    }
    wait_for("all applied", || {
        client.device_tags("node-1") == vec!["tag:a", "tag:b"]
    })
    .await;

    // every write went through the single manager, so each call's result is
    // a superset-consistent monotone sequence with no interleaving
    let calls = client.set_tags_calls("node-1");
    assert!(!calls.is_empty());
    for call in &calls {
        let mut sorted = call.clone();
        sorted.sort();
        assert_eq!(*call, sorted, "authoritative writes are always sorted");
    }
}
