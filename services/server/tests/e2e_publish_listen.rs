//! End-to-end publish/listen suite.
//!
//! Runs the server in-process on a random port against the in-memory key
//! store and bus, provisions keys through the store, and exercises the wire
//! contract with a real HTTP client and WebSocket listeners.
//!
//! # Coverage
//! - Simple cue delivery with base64 content.
//! - Glob fan-out to multiple listeners of one user.
//! - Producer- and subscriber-side key scoping.
//! - Cross-user isolation.
//! - Body-size boundary at 512 KiB.
//! - Registry pruning on disconnect and the 1008 policy close.

use cue_server::bus::LocalBus;
use cue_server::state::AppState;
use cue_server::store::{KeyStore, MemoryKeyStore};
use cue_server::Dispatcher;
use cue_test_utils::ListenClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn test_state() -> AppState {
    AppState::new(Arc::new(MemoryKeyStore::new()), Arc::new(LocalBus::new()))
}

/// Spin up an in-process server plus its dispatcher.  Returns the bound
/// address; the `AppState` clone lets tests provision keys and inspect the
/// listener registry directly.
async fn start_server(state: AppState) -> SocketAddr {
    // The dispatch task detaches here and runs for the life of the test
    // process.
    let _dispatcher = Dispatcher::spawn(state.clone());
    let router = cue_server::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server error");
    });
    // Give the server and dispatcher a moment to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Provision a redeemed key for `uid`, returning the raw key material.
async fn provision_key(state: &AppState, uid: &str, pattern: Option<&str>) -> String {
    let grant = state
        .keys
        .start_key_request("test-key", pattern)
        .await
        .expect("start key request");
    state
        .keys
        .redeem_key_request(&grant.request_id, uid, "test-key")
        .await
        .expect("redeem key request");
    grant.key
}

/// Wait until `uid` has exactly `count` registered listener sessions.
async fn wait_for_listeners(state: &AppState, uid: &str, count: usize) {
    for _ in 0..200 {
        if state.listener_count(uid).await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} listeners for {uid}, found {}",
        state.listener_count(uid).await
    );
}

async fn publish(
    addr: SocketAddr,
    key: &str,
    names: &[&str],
    body: Vec<u8>,
) -> reqwest::Response {
    let query: Vec<(&str, &str)> = names.iter().map(|n| ("name", *n)).collect();
    reqwest::Client::new()
        .post(format!("http://{addr}/api/cues"))
        .query(&query)
        .header("Authorization", format!("Bearer {key}"))
        .body(body)
        .send()
        .await
        .expect("publish request")
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_cue_reaches_its_listener() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &key, &["deploy"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    let response = publish(addr, &key, &["deploy"], b"hi".to_vec()).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Posted");

    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(frame.names, vec!["deploy".to_owned()]);
    assert_eq!(frame.content.as_deref(), Some("aGk="));
}

#[tokio::test]
async fn empty_body_delivers_null_content() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &key, &["ping"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    assert_eq!(publish(addr, &key, &["ping"], Vec::new()).await.status(), 200);

    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(frame.content, None);
}

#[tokio::test]
async fn glob_patterns_fan_out_to_every_matching_listener() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut l1 = ListenClient::connect(&addr.to_string(), &key, &["build.*"])
        .await
        .expect("first listener");
    let mut l2 = ListenClient::connect(&addr.to_string(), &key, &["*.done"])
        .await
        .expect("second listener");
    let mut l3 = ListenClient::connect(&addr.to_string(), &key, &["other"])
        .await
        .expect("third listener");
    wait_for_listeners(&state, "u1", 3).await;

    assert_eq!(
        publish(addr, &key, &["build.done"], Vec::new()).await.status(),
        200
    );

    for listener in [&mut l1, &mut l2] {
        let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
            .await
            .expect("frame within deadline")
            .expect("frame delivered");
        assert_eq!(frame.names, vec!["build.done".to_owned()]);
    }

    // The non-matching listener sees nothing.
    let missed = l3
        .recv_frame_timeout(Duration::from_millis(300))
        .await
        .expect("clean read");
    assert!(missed.is_none(), "non-matching listener must stay silent");
}

#[tokio::test]
async fn one_cue_with_many_names_yields_one_frame_per_listener() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &key, &["build.*", "*"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    assert_eq!(
        publish(addr, &key, &["build.done", "alert"], Vec::new())
            .await
            .status(),
        200
    );

    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(
        frame.names,
        vec!["alert".to_owned(), "build.done".to_owned()]
    );
    let extra = listener
        .recv_frame_timeout(Duration::from_millis(300))
        .await
        .expect("clean read");
    assert!(extra.is_none(), "a cue is delivered at most once per session");
}

// ---------------------------------------------------------------------------
// Scoping and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn producer_scoped_key_cannot_post_outside_its_pattern() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let scoped = provision_key(&state, "u1", Some("test.*")).await;
    let open = provision_key(&state, "u1", None).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &open, &["*"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    let response = publish(addr, &scoped, &["prod.release"], Vec::new()).await;
    assert_eq!(response.status(), 401);
    let body = response.text().await.unwrap();
    assert!(
        body.contains("prod.release"),
        "denial names the offending cue: {body}"
    );

    // A mixed publish is denied as a whole.
    let response = publish(addr, &scoped, &["test.ok", "prod.release"], Vec::new()).await;
    assert_eq!(response.status(), 401);

    // Nothing leaked to the listener; a follow-up allowed cue arrives first.
    assert_eq!(
        publish(addr, &scoped, &["test.ok"], Vec::new()).await.status(),
        200
    );
    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(frame.names, vec!["test.ok".to_owned()]);
}

#[tokio::test]
async fn subscriber_scoped_key_never_sees_names_outside_its_pattern() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let open = provision_key(&state, "u1", None).await;
    let scoped = provision_key(&state, "u1", Some("eu.*")).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &scoped, &["*"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    assert_eq!(
        publish(addr, &open, &["us.alert"], Vec::new()).await.status(),
        200
    );
    assert_eq!(
        publish(addr, &open, &["eu.alert"], Vec::new()).await.status(),
        200
    );

    // Only the eu cue arrives, proving us.alert was filtered rather than
    // merely delayed.
    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(frame.names, vec!["eu.alert".to_owned()]);
}

#[tokio::test]
async fn cues_never_cross_users() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key_a = provision_key(&state, "userA", None).await;
    let key_b = provision_key(&state, "userB", None).await;

    let mut listener_b = ListenClient::connect(&addr.to_string(), &key_b, &["*"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "userB", 1).await;

    assert_eq!(
        publish(addr, &key_a, &["deploy"], Vec::new()).await.status(),
        200
    );
    assert_eq!(
        publish(addr, &key_b, &["own-cue"], Vec::new()).await.status(),
        200
    );

    let frame = tokio::time::timeout(Duration::from_secs(2), listener_b.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(
        frame.names,
        vec!["own-cue".to_owned()],
        "userB must only see userB cues"
    );
}

// ---------------------------------------------------------------------------
// Publish edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn path_param_publish_is_equivalent_to_query_form() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut listener = ListenClient::connect(&addr.to_string(), &key, &["deploy"])
        .await
        .expect("listener connects");
    wait_for_listeners(&state, "u1", 1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/cues/deploy"))
        .header("Authorization", format!("Bearer {key}"))
        .body("hi")
        .send()
        .await
        .expect("publish request");
    assert_eq!(response.status(), 200);

    let frame = tokio::time::timeout(Duration::from_secs(2), listener.recv_frame())
        .await
        .expect("frame within deadline")
        .expect("frame delivered");
    assert_eq!(frame.names, vec!["deploy".to_owned()]);
    assert_eq!(frame.content.as_deref(), Some("aGk="));
}

#[tokio::test]
async fn body_size_boundary_is_exact() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let at_limit = vec![0x61; 512 * 1024];
    assert_eq!(publish(addr, &key, &["big"], at_limit).await.status(), 200);

    let over_limit = vec![0x61; 512 * 1024 + 1];
    assert_eq!(publish(addr, &key, &["big"], over_limit).await.status(), 400);
}

#[tokio::test]
async fn publish_validation_failures() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    // No names at all.
    assert_eq!(publish(addr, &key, &[], Vec::new()).await.status(), 400);

    // Over-long name.
    let long = "n".repeat(1025);
    assert_eq!(
        publish(addr, &key, &[long.as_str()], Vec::new()).await.status(),
        400
    );

    // Missing auth.
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/cues?name=deploy"))
        .body("hi")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Unknown key.
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/cues?name=deploy"))
        .header("Authorization", "Bearer notARealKey123")
        .body("hi")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

// ---------------------------------------------------------------------------
// Listen edge cases
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listen_without_valid_key_closes_with_policy_violation() {
    let state = test_state();
    let addr = start_server(state.clone()).await;

    let mut client = ListenClient::connect(&addr.to_string(), "notARealKey123", &["deploy"])
        .await
        .expect("upgrade completes before the policy close");
    let code = client.recv_close().await.expect("close frame");
    assert_eq!(code, Some(1008));
}

#[tokio::test]
async fn listen_pattern_validation() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    // No patterns.
    assert!(
        ListenClient::connect(&addr.to_string(), &key, &[]).await.is_err(),
        "zero patterns is rejected with 400"
    );

    // Too many patterns.
    let many: Vec<String> = (0..129).map(|i| format!("p{i}")).collect();
    let many_refs: Vec<&str> = many.iter().map(String::as_str).collect();
    assert!(
        ListenClient::connect(&addr.to_string(), &key, &many_refs)
            .await
            .is_err(),
        "more than 128 patterns is rejected with 400"
    );

    // Malformed glob.
    assert!(
        ListenClient::connect(&addr.to_string(), &key, &["broken["])
            .await
            .is_err(),
        "an uncompilable pattern is rejected with 400"
    );
}

#[tokio::test]
async fn disconnects_prune_the_registry() {
    let state = test_state();
    let addr = start_server(state.clone()).await;
    let key = provision_key(&state, "u1", None).await;

    let mut l1 = ListenClient::connect(&addr.to_string(), &key, &["a"])
        .await
        .expect("first listener");
    let l2 = ListenClient::connect(&addr.to_string(), &key, &["b"])
        .await
        .expect("second listener");
    wait_for_listeners(&state, "u1", 2).await;

    l1.close().await.expect("clean close");
    wait_for_listeners(&state, "u1", 1).await;

    drop(l2);
    wait_for_listeners(&state, "u1", 0).await;
    assert!(
        !state.has_listener_bucket("u1").await,
        "empty uid buckets are pruned"
    );
}
