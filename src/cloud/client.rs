//! HTTP client for the vendor device-directory API
//!
//! Three calls are needed before a control session can be opened:
//!
//! - [`DirectoryClient::resolve_account_id`] turns the OIDC identity token
//!   into the account id that prefixes the MQTT client id.
//! - [`DirectoryClient::list_devices`] returns the devices on the account.
//! - [`DirectoryClient::get_connection_signature`] returns the time-scoped
//!   custom-authorizer signature.
//!
//! Every request carries the user agent of the vendor mobile app. Failures
//! are reported as [`ApiError`] and never retried here.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;

use crate::cloud::types::{
    AccountIdRequest, AccountIdResponse, DeviceIdentity, DeviceListResponse, SignatureResponse,
};
use crate::config::ApiConfig;
use crate::error::{AirlinkError, ApiError, Result};

/// Account id resolution endpoint
pub const ACCOUNT_ID_PATH: &str = "/user/self/get-id";
/// Device listing endpoint
pub const DEVICES_PATH: &str = "/user/self/device";
/// MQTT authorizer signature endpoint
pub const SIGNATURE_PATH: &str = "/user/self/signature";

/// Client for the account, device and signature endpoints.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl DirectoryClient {
    /// Builds a client with its own connection pool and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AirlinkError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Uses an existing HTTP client.
    pub fn with_client(http: reqwest::Client, config: &ApiConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Resolves the account id for an identity token.
    ///
    /// The identity token is sent as the `idToken` JSON body field; this
    /// endpoint takes no bearer header.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure, non-2xx status or an
    /// unexpected body.
    pub async fn resolve_account_id(&self, id_token: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.url(ACCOUNT_ID_PATH))
            .header(USER_AGENT, &self.user_agent)
            .json(&AccountIdRequest { id_token })
            .send()
            .await;

        let body: AccountIdResponse = read_json(ACCOUNT_ID_PATH, resp).await?;
        tracing::debug!("Resolved account id");
        Ok(body.user_id)
    }

    /// Lists the devices registered to the account, in API order.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure, non-2xx status or an
    /// unexpected body.
    pub async fn list_devices(&self, access_token: &str) -> Result<Vec<DeviceIdentity>> {
        let resp = self.bearer_get(DEVICES_PATH, access_token).await;
        let body: DeviceListResponse = read_json(DEVICES_PATH, resp).await?;
        let devices = body.into_devices();
        tracing::debug!("Account has {} device(s)", devices.len());
        Ok(devices)
    }

    /// Fetches a fresh custom-authorizer signature for the MQTT connection.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure, non-2xx status or an
    /// unexpected body.
    pub async fn get_connection_signature(&self, access_token: &str) -> Result<String> {
        let resp = self.bearer_get(SIGNATURE_PATH, access_token).await;
        let body: SignatureResponse = read_json(SIGNATURE_PATH, resp).await?;
        Ok(body.signature)
    }

    async fn bearer_get(
        &self,
        path: &str,
        access_token: &str,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(self.url(path))
            .header(USER_AGENT, &self.user_agent)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Picks the device to control: the first one the API returned.
///
/// # Errors
///
/// Returns [`AirlinkError::NoDevices`] for an empty list.
pub fn select_device(devices: &[DeviceIdentity]) -> Result<DeviceIdentity> {
    devices
        .first()
        .cloned()
        .ok_or_else(|| AirlinkError::NoDevices.into())
}

async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    resp: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<T> {
    let resp = resp.map_err(|e| api_error(endpoint, None, e.to_string()))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| api_error(endpoint, Some(status.as_u16()), e.to_string()))?;

    if !status.is_success() {
        tracing::warn!("{} returned {}", endpoint, status);
        return Err(api_error(endpoint, Some(status.as_u16()), body).into());
    }

    serde_json::from_str(&body).map_err(|e| {
        api_error(
            endpoint,
            Some(status.as_u16()),
            format!("unexpected response body ({e}): {body}"),
        )
        .into()
    })
}

fn api_error(endpoint: &str, status_code: Option<u16>, body: String) -> AirlinkError {
    AirlinkError::Api(ApiError {
        endpoint: endpoint.to_string(),
        status_code,
        body,
    })
}
