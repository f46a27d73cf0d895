//! End-to-end behaviour of the bridge callbacks against scripted
//! collaborators.

use std::sync::Arc;

use serde_json::json;
use thingsverse_bridge::testing::{agent_fixture, report_body, LogCapture, RecordingPublisher, ScriptedStore};
use thingsverse_bridge::{Bridge, Outcome};
use thingsverse_protocol::{MetricSample, SessionId, TopicKind, TOPIC_AGENT_CONNECTED, TOPIC_AGENT_DISCONNECTED};

const SCENARIO_BODY: &str = r#"{"agent":{"uuid":"u1","name":"n","username":"a","hostname":"h","pid":1},"metrics":[{"type":"rss","value":123}]}"#;

fn setup() -> (Arc<ScriptedStore>, Arc<RecordingPublisher>, Bridge<ScriptedStore, RecordingPublisher>) {
    let store = Arc::new(ScriptedStore::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let bridge = Bridge::new(Arc::clone(&store), Arc::clone(&publisher));
    (store, publisher, bridge)
}

// ─── First report, repeat report, disconnect ─────────────────────────────────

#[tokio::test]
async fn test_first_report_upserts_announces_and_stores() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    let outcome = bridge
        .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    assert!(matches!(outcome, Outcome::Processed { announced: true, .. }));

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].uuid, "u1");
    assert!(upserts[0].connected, "registration forces connected=true");

    let connected = publisher.on_topic(TOPIC_AGENT_CONNECTED);
    assert_eq!(
        connected,
        vec![json!({"uuid":"u1","name":"n","username":"a","hostname":"h","pid":1,"connected":true})]
    );

    assert_eq!(
        store.metric_calls(),
        vec![("u1".to_string(), MetricSample::new("rss", 123))]
    );
    assert_eq!(store.inner().metric_count().await, 1);
}

#[tokio::test]
async fn test_second_report_same_session_is_not_reannounced() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1).await;
    let outcome = bridge
        .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;

    assert!(matches!(outcome, Outcome::Processed { announced: false, .. }));
    assert_eq!(store.upserts().len(), 2, "every report is persisted");
    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 1);
}

#[tokio::test]
async fn test_disconnect_after_report() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1).await;

    let announced = bridge.on_client_disconnected(&s1).await;
    assert_eq!(announced.as_deref(), Some("u1"));

    let last = store.upserts().pop().unwrap();
    assert_eq!(last.uuid, "u1");
    assert!(!last.connected);
    assert_eq!(
        publisher.on_topic(TOPIC_AGENT_DISCONNECTED),
        vec![json!({"agent": {"uuid": "u1"}})]
    );
    assert!(bridge.sessions().read().await.get(&s1).is_none());
    assert!(!bridge.sessions().read().await.is_open(&s1));

    let record = store.inner().find_agent("u1").await.unwrap();
    assert!(!record.agent.connected);
}

#[tokio::test]
async fn test_disconnect_before_any_report_is_silent() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    assert_eq!(bridge.on_client_disconnected(&s1).await, None);
    assert!(store.upserts().is_empty());
    assert!(publisher.published().is_empty());
    assert!(bridge.sessions().read().await.is_empty());
}

#[tokio::test]
async fn test_same_agent_on_two_sessions_announces_twice() {
    let (_store, publisher, bridge) = setup();
    let a = SessionId::from("a");
    let b = SessionId::from("b");
    bridge.on_client_connected(&a).await;
    bridge.on_client_connected(&b).await;

    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &a).await;
    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &b).await;

    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 2);
}

#[tokio::test]
async fn test_reconnect_announces_again() {
    let (_store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1).await;
    bridge.on_client_disconnected(&s1).await;

    bridge.on_client_connected(&s1).await;
    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1).await;

    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 2);
    assert_eq!(publisher.on_topic(TOPIC_AGENT_DISCONNECTED).len(), 1);
}

// ─── Topics and payloads ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_topic_is_ignored() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    let (logs, _guard) = LogCapture::install();

    let outcome = bridge
        .on_published("unknown/topic", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    assert_eq!(outcome, Outcome::Unrecognized);
    assert!(store.upserts().is_empty());
    assert!(store.metric_calls().is_empty());
    assert!(publisher.published().is_empty());
    assert_eq!(logs.count_at("WARN"), 1);
    assert_eq!(logs.count_at("ERROR"), 0);
}

#[tokio::test]
async fn test_echoed_notices_are_not_reprocessed() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    let connected = bridge
        .on_published(TOPIC_AGENT_CONNECTED, Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    let disconnected = bridge.on_published(TOPIC_AGENT_DISCONNECTED, None, &s1).await;

    assert_eq!(connected, Outcome::Ignored(TopicKind::ConnectedNotice));
    assert_eq!(disconnected, Outcome::Ignored(TopicKind::DisconnectedNotice));
    assert!(store.upserts().is_empty());
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn test_malformed_payloads_change_nothing() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    let bodies: [Option<&[u8]>; 4] = [
        None,
        Some(b""),
        Some(b"{broken"),
        Some(br#"{"agent":{"uuid":"u1"}}"#),
    ];
    for body in bodies {
        assert_eq!(bridge.on_published("agent/message", body, &s1).await, Outcome::Malformed);
    }
    assert!(store.upserts().is_empty());
    assert!(publisher.published().is_empty());
    assert!(bridge.sessions().read().await.get(&s1).is_none());
}

#[tokio::test]
async fn test_report_from_unopened_session_is_still_processed() {
    let (store, publisher, bridge) = setup();
    let pre = SessionId::from("pre-existing");

    for _ in 0..3 {
        let outcome = bridge
            .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &pre)
            .await;
        assert!(matches!(outcome, Outcome::Processed { announced: true, .. }));
    }

    let upserts = store.upserts();
    assert_eq!(upserts.len(), 3);
    assert!(upserts.iter().all(|a| a.uuid == "u1" && a.connected));
    assert_eq!(store.inner().metric_count().await, 3);
    // Nothing can be cached for it, so every report announces.
    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 3);
    assert!(!bridge.sessions().read().await.is_open(&pre));

    // Its disconnect has no cached identity to mark offline.
    assert_eq!(bridge.on_client_disconnected(&pre).await, None);
    assert!(publisher.on_topic(TOPIC_AGENT_DISCONNECTED).is_empty());
}

// ─── Failure isolation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_registration_failure_skips_metrics_and_notice() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    store.fail_agent("u1");

    let outcome = bridge
        .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    assert_eq!(outcome, Outcome::RegistrationFailed);
    assert_eq!(store.upserts().len(), 1);
    assert!(store.metric_calls().is_empty(), "metrics wait on registration");
    assert!(publisher.published().is_empty());
    assert!(bridge.sessions().read().await.get(&s1).is_none());

    // Recovery: the next report from the same session is the first success.
    store.heal_agent("u1");
    let outcome = bridge
        .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    assert!(matches!(outcome, Outcome::Processed { announced: true, .. }));
}

#[tokio::test]
async fn test_one_failing_metric_does_not_abort_batch() {
    let (store, _publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    store.fail_metric("cpu");
    let (logs, _guard) = LogCapture::install();

    let agent = agent_fixture("u1");
    let body = report_body(
        &agent,
        &[MetricSample::new("cpu", 10), MetricSample::new("rss", 20)],
    );
    let outcome = bridge.on_published("agent/message", Some(&body), &s1).await;

    match outcome {
        Outcome::Processed { metrics, .. } => {
            assert_eq!(metrics.stored.len(), 1);
            assert_eq!(metrics.stored[0].metric_type, "rss");
            assert_eq!(metrics.failed, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.metric_calls().len(), 2, "both samples attempted");
    assert_eq!(store.inner().metric_count().await, 1);
    assert_eq!(logs.count_at("ERROR"), 1, "one logged failure");
    assert_eq!(logs.count_at("WARN"), 0);
}

#[tokio::test]
async fn test_odd_metric_values_fail_per_sample() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    let body = br#"{"agent":{"uuid":"u1","name":"n","username":"a","hostname":"h","pid":1},
        "metrics":[{"type":"rss","value":123},{"type":"loadavg","value":[0.1,0.2,0.3]},
                   {"type":"swap","value":null},{"type":"cpu"}]}"#;
    let outcome = bridge.on_published("agent/message", Some(&body[..]), &s1).await;

    match outcome {
        Outcome::Processed { announced, metrics, .. } => {
            assert!(announced);
            let types: Vec<&str> = metrics.stored.iter().map(|m| m.metric_type.as_str()).collect();
            assert_eq!(types, vec!["rss", "loadavg"]);
            assert_eq!(metrics.failed, 2, "null and missing values are rejected");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.upserts().len(), 1);
    assert_eq!(store.metric_calls().len(), 4);
    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 1);
}

#[tokio::test]
async fn test_disconnect_persist_failure_suppresses_notice() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    bridge.on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1).await;
    store.fail_agent("u1");

    assert_eq!(bridge.on_client_disconnected(&s1).await, None);
    assert!(publisher.on_topic(TOPIC_AGENT_DISCONNECTED).is_empty());
    assert!(!bridge.sessions().read().await.is_open(&s1), "entry is not re-inserted");
}

#[tokio::test]
async fn test_connected_publish_failure_still_caches_identity() {
    let (_store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;
    publisher.set_failing(true);

    let outcome = bridge
        .on_published("agent/message", Some(SCENARIO_BODY.as_bytes()), &s1)
        .await;
    assert!(matches!(outcome, Outcome::Processed { announced: true, .. }));
    assert_eq!(
        bridge.sessions().read().await.get(&s1).map(|a| a.uuid.clone()),
        Some("u1".to_string())
    );
}

// ─── Documented quirk ────────────────────────────────────────────────────────

/// Suppression keys on "any identity cached for this session", not on the
/// uuid, so a second agent on the same connection is not announced.
#[tokio::test]
async fn test_different_uuid_on_same_session_is_not_announced() {
    let (store, publisher, bridge) = setup();
    let s1 = SessionId::from("s1");
    bridge.on_client_connected(&s1).await;

    let first = report_body(&agent_fixture("u1"), &[]);
    let second = report_body(&agent_fixture("u2"), &[]);
    bridge.on_published("agent/message", Some(&first), &s1).await;
    let outcome = bridge.on_published("agent/message", Some(&second), &s1).await;

    assert!(matches!(outcome, Outcome::Processed { announced: false, .. }));
    assert_eq!(publisher.on_topic(TOPIC_AGENT_CONNECTED).len(), 1);
    assert_eq!(store.upserts().len(), 2);
    assert_eq!(
        bridge.sessions().read().await.get(&s1).map(|a| a.uuid.clone()),
        Some("u2".to_string()),
        "cache follows the most recent registration"
    );

    // Disconnect reports the most recent identity only.
    bridge.on_client_disconnected(&s1).await;
    assert_eq!(
        publisher.on_topic(TOPIC_AGENT_DISCONNECTED),
        vec![json!({"agent": {"uuid": "u2"}})]
    );
}
