//! End-to-end tests for the push subscription lifecycle against the portal
//! endpoints.

mod common;

use common::{fast_config, quiet_engine, wait_until, TestServer};
use protocolo_notify_client::NotificationEngine;

fn push_engine(server: &TestServer) -> NotificationEngine {
    let mut config = fast_config(server);
    config.push_relay_url = Some(server.base_url.clone());
    config.push_server_key = Some("server-key".to_string());
    quiet_engine(config)
}

#[tokio::test]
async fn test_register_creates_one_server_subscription() {
    let server = TestServer::spawn().await;
    let engine = push_engine(&server);

    let subscription = engine.register_push().await.unwrap();
    assert_eq!(subscription.user_id, common::TEST_USER);
    assert_eq!(server.push_registrations(), 1);

    // Idempotent: a second register is answered locally.
    let again = engine.register_push().await.unwrap();
    assert_eq!(again, subscription);
    assert_eq!(server.push_registrations(), 1);
    engine.dispose().await;
}

#[tokio::test]
async fn test_revoke_clears_subscription_and_notifies_server() {
    let server = TestServer::spawn().await;
    let engine = push_engine(&server);

    engine.register_push().await.unwrap();
    engine.revoke_push().await;

    assert!(engine.push_subscription().await.is_none());
    wait_until("server revocation", || server.push_revocations() == 1).await;
    engine.dispose().await;
}

#[tokio::test]
async fn test_revoke_retries_once_after_server_error() {
    let server = TestServer::spawn().await;
    let engine = push_engine(&server);

    engine.register_push().await.unwrap();
    server.fail_next_revocations(1);
    engine.revoke_push().await;

    assert!(engine.push_subscription().await.is_none());
    // First attempt failed, the retry landed.
    wait_until("server revocation", || server.push_revocations() == 1).await;
    engine.dispose().await;
}

#[tokio::test]
async fn test_revoke_succeeds_locally_when_server_never_acknowledges() {
    let server = TestServer::spawn().await;
    let engine = push_engine(&server);

    engine.register_push().await.unwrap();
    server.fail_next_revocations(100);
    engine.revoke_push().await;

    assert!(engine.push_subscription().await.is_none());
    assert_eq!(server.push_revocations(), 0);
    engine.dispose().await;
}

#[tokio::test]
async fn test_register_after_revoke_subscribes_again() {
    let server = TestServer::spawn().await;
    let engine = push_engine(&server);

    let first = engine.register_push().await.unwrap();
    engine.revoke_push().await;
    let second = engine.register_push().await.unwrap();

    assert_ne!(first.endpoint, second.endpoint);
    assert_eq!(server.push_registrations(), 2);
    engine.dispose().await;
}
