//! Resume handling against a live HTTP mock.

mod common;

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_auth::AppLifecycleEvent;
use tether_config::TetherConfig;
use tether_session::InMemoryAuth;

use common::{Harness, session, wait_until};

async fn harness_for(server: &MockServer) -> anyhow::Result<Harness> {
    let config = TetherConfig::default()
        .with_backend_url(server.uri())
        .with_api_key("anon-key");
    Harness::new(config, InMemoryAuth::new())
}

#[tokio::test]
async fn test_resume_aborts_requests_from_before_suspension() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doses"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let harness = harness_for(&server).await?;
    let client = harness.context.client.clone();

    let mut pending = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.get::<Value>("rest/v1/doses").await
        }));
    }
    let watched = client.clone();
    wait_until(move || {
        let watched = watched.clone();
        async move { watched.active_count() == 5 }
    })
    .await;

    assert_eq!(harness.context.resume.on_resume(), 5);
    for task in pending {
        let err = task.await?.unwrap_err();
        assert!(err.is_aborted(), "expected abort, got {err:?}");
    }
    assert_eq!(client.generation(), 1);
    assert_eq!(client.active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_requests_after_resume_use_new_transport() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profile"))
        .and(header("authorization", "Bearer signed-in"))
        .and(header("apikey", "anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user-1"})))
        .mount(&server)
        .await;

    let harness = harness_for(&server).await?;
    harness.context.cache.write(&session("signed-in"));
    let client = harness.context.client.clone();

    let (tx, rx) = mpsc::channel(4);
    let listener = harness.context.resume.clone().listen(rx);
    tx.send(AppLifecycleEvent::Backgrounded).await?;
    tx.send(AppLifecycleEvent::Resumed).await?;
    drop(tx);
    listener.await?;

    assert_eq!(client.generation(), 1);
    let profile: Value = client.get("rest/v1/profile").await?;
    assert_eq!(profile["id"], "user-1");
    Ok(())
}

#[tokio::test]
async fn test_sign_out_leaves_queries_anonymous() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let harness = harness_for(&server).await?;
    harness.auth.sign_in(session("signed-in"));
    let client = harness.context.client.clone();
    let probe = client.clone();
    wait_until(move || {
        let probe = probe.clone();
        async move { probe.has_token().await }
    })
    .await;

    harness.auth.sign_out();
    let probe = client.clone();
    wait_until(move || {
        let probe = probe.clone();
        async move { !probe.has_token().await }
    })
    .await;

    let _: Vec<Value> = client.get("rest/v1/doses").await?;
    let requests = server.received_requests().await.unwrap_or_default();
    let last = requests.last().expect("one request");
    assert!(last.headers.get("authorization").is_none());
    Ok(())
}
