//! Vendor directory API integration tests using wiremock
//!
//! Covers `src/cloud/client.rs` request shapes and error mapping, and the
//! HTTP half of the startup sequence in `src/bridge.rs`.

mod common;

use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use std::sync::Arc;

use airlink::auth::TokenStore;
use airlink::bridge::{prepare, DirectoryGrants};
use airlink::control::GrantSource;
use airlink::cloud::DirectoryClient;
use airlink::error::{AirlinkError, ApiError};

/// Matches requests without an `Authorization` header.
struct NoAuthorization;

impl Match for NoAuthorization {
    fn matches(&self, request: &Request) -> bool {
        !request
            .headers
            .keys()
            .any(|name| name.as_str().eq_ignore_ascii_case("authorization"))
    }
}

fn client(server: &MockServer) -> DirectoryClient {
    DirectoryClient::new(&common::api_config(&server.uri())).unwrap()
}

fn api_error(err: &anyhow::Error) -> &ApiError {
    match err.downcast_ref::<AirlinkError>() {
        Some(AirlinkError::Api(api)) => api,
        other => panic!("expected ApiError, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resolve_account_id_posts_id_token_without_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/da/user/self/get-id"))
        .and(header("user-agent", common::TEST_USER_AGENT))
        .and(body_json(serde_json::json!({ "idToken": "id-123" })))
        .and(NoAuthorization)
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "userId": "acct-9" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let account = client(&server).resolve_account_id("id-123").await.unwrap();
    assert_eq!(account, "acct-9");
}

#[tokio::test]
async fn test_list_devices_uses_bearer_and_defaults_missing_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/device"))
        .and(header("authorization", "Bearer access-1"))
        .and(header("user-agent", common::TEST_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "thingName": "thing-a", "friendlyName": "Living room", "deviceId": "d-1", "extra": 1 },
            { "thingName": "thing-b" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let devices = client(&server).list_devices("access-1").await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].thing_name, "thing-a");
    assert_eq!(devices[0].friendly_name, "Living room");
    assert_eq!(devices[1].friendly_name, "Philips Air Purifier");
    assert_eq!(devices[1].device_id, "");
}

#[tokio::test]
async fn test_get_connection_signature() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/signature"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "signature": "sig==" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let signature = client(&server)
        .get_connection_signature("access-1")
        .await
        .unwrap();
    assert_eq!(signature, "sig==");
}

#[tokio::test]
async fn test_non_success_status_is_api_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/signature"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .get_connection_signature("access-1")
        .await
        .unwrap_err();
    let api = api_error(&err);
    assert_eq!(api.status_code, Some(403));
    assert_eq!(api.body, "forbidden");
    assert!(api.endpoint.contains("signature"));
}

#[tokio::test]
async fn test_unreachable_api_is_api_error_without_status() {
    let config = common::api_config("http://127.0.0.1:9");
    let err = DirectoryClient::new(&config)
        .unwrap()
        .list_devices("access-1")
        .await
        .unwrap_err();
    assert_eq!(api_error(&err).status_code, None);
}

// ---------------------------------------------------------------------------
// Startup sequence, HTTP half
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_prepare_with_no_devices_stops_before_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/da/user/self/get-id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "userId": "acct-9" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "signature": "s" })))
        .expect(0)
        .mount(&server)
        .await;

    let (_tmp, creds) = common::credentials_path();
    TokenStore::new(&creds).save(&common::fresh_bundle()).unwrap();
    let (manager, _prompt) = common::manager(&server.uri(), creds, "unused");

    let plan = prepare(&manager, &client(&server)).await.unwrap();
    assert!(plan.is_none());
}

#[tokio::test]
async fn test_prepare_builds_grant_from_account_and_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/da/user/self/get-id"))
        .and(body_json(serde_json::json!({ "idToken": "stored-id" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "userId": "acct-9" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/device"))
        .and(header("authorization", "Bearer stored-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "devices": [
                { "thingName": "thing-a", "friendlyName": "First" },
                { "thingName": "thing-b", "friendlyName": "Second" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/signature"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "signature": "sig-1" })),
        )
        .mount(&server)
        .await;

    let (_tmp, creds) = common::credentials_path();
    TokenStore::new(&creds).save(&common::fresh_bundle()).unwrap();
    let (manager, _prompt) = common::manager(&server.uri(), creds, "unused");

    let plan = prepare(&manager, &client(&server)).await.unwrap().unwrap();
    assert_eq!(plan.device.thing_name, "thing-a");
    assert_eq!(plan.grant.account_id, "acct-9");
    assert!(plan.grant.client_id.starts_with("acct-9_"));
    assert_eq!(plan.grant.authorizer_signature, "sig-1");
    assert_eq!(plan.grant.bearer_token, "stored-access");
}

#[tokio::test]
async fn test_directory_grants_fetch_new_signature_per_grant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/da/user/self/signature"))
        .and(header("authorization", "Bearer stored-access"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "signature": "sig-2" })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (_tmp, creds) = common::credentials_path();
    TokenStore::new(&creds).save(&common::fresh_bundle()).unwrap();
    let (manager, prompt) = common::manager(&server.uri(), creds, "unused");

    let grants = DirectoryGrants::new(Arc::new(manager), client(&server), "acct-9");
    let first = grants.next_grant().await.unwrap();
    let second = grants.next_grant().await.unwrap();

    assert_eq!(first.authorizer_signature, "sig-2");
    assert_eq!(first.bearer_token, "stored-access");
    assert_eq!(first.account_id, "acct-9");
    assert!(first.client_id.starts_with("acct-9_"));
    assert_ne!(first.client_id, second.client_id);
    assert!(prompt.shown_urls().is_empty());
}
