use std::path::PathBuf;
use std::sync::Arc;

use airlink::auth::prompt::StaticPrompt;
use airlink::auth::{CredentialBundle, CredentialManager, TokenStore};
use airlink::config::{ApiConfig, IdentityConfig};
use tempfile::TempDir;

#[allow(dead_code)]
pub const TEST_USER_AGENT: &str = "airlink-test/1.0";

#[allow(dead_code)]
pub fn identity_config(server_uri: &str) -> IdentityConfig {
    IdentityConfig {
        authorize_url: format!("{}/authorize", server_uri),
        token_url: format!("{}/token", server_uri),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        ..IdentityConfig::default()
    }
}

#[allow(dead_code)]
pub fn api_config(server_uri: &str) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/api/da", server_uri),
        user_agent: TEST_USER_AGENT.to_string(),
        request_timeout_seconds: 5,
    }
}

#[allow(dead_code)]
pub fn credentials_path() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let path = tmp.path().join("credentials.json");
    (tmp, path)
}

/// Bundle valid for another hour.
#[allow(dead_code)]
pub fn fresh_bundle() -> CredentialBundle {
    CredentialBundle::issued_at(
        chrono::Utc::now().timestamp_millis(),
        "stored-access".to_string(),
        "stored-id".to_string(),
        "stored-refresh".to_string(),
        Some(3600),
    )
}

/// Bundle that expired long ago.
#[allow(dead_code)]
pub fn expired_bundle() -> CredentialBundle {
    CredentialBundle::issued_at(
        0,
        "old-access".to_string(),
        "old-id".to_string(),
        "old-refresh".to_string(),
        Some(3600),
    )
}

#[allow(dead_code)]
pub fn token_body(access: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "id_token": format!("{access}-id"),
        "refresh_token": format!("{access}-refresh"),
        "expires_in": 3600,
        "token_type": "Bearer",
    })
}

/// Manager against a mock identity provider, answering the redirect prompt
/// with `redirect`.
#[allow(dead_code)]
pub fn manager(
    server_uri: &str,
    path: PathBuf,
    redirect: &str,
) -> (CredentialManager, Arc<StaticPrompt>) {
    let prompt = Arc::new(StaticPrompt::new(redirect));
    let manager = CredentialManager::new(
        reqwest::Client::new(),
        identity_config(server_uri),
        TokenStore::new(path),
        prompt.clone(),
    );
    (manager, prompt)
}
