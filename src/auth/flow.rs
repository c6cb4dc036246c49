//! OAuth2 authorization code flow with PKCE against the vendor identity provider
//!
//! # Flow overview
//!
//! 1. Generate a PKCE challenge ([`pkce::generate`]).
//! 2. Build the authorization URL ([`OAuthFlow::authorization_url`]).
//! 3. The operator signs in and pastes the custom-scheme redirect URL back.
//! 4. Extract the `code` ([`extract_code`]).
//! 5. Exchange `code` + `code_verifier` + client credentials at the token
//!    endpoint ([`OAuthFlow::exchange_code`]).
//!
//! Refresh uses the same token endpoint with `grant_type=refresh_token`
//! ([`OAuthFlow::refresh`]). Every failure leaving this module is an
//! [`AuthError`].

use std::collections::HashMap;

use url::Url;

use crate::auth::pkce::{PkceChallenge, METHOD_S256};
use crate::auth::token_store::CredentialBundle;
use crate::config::IdentityConfig;
use crate::error::{AirlinkError, AuthError, Result};

// ---------------------------------------------------------------------------
// Token endpoint response (raw deserialization)
// ---------------------------------------------------------------------------

/// Raw JSON body of the token endpoint.
///
/// Success and error responses share one shape; the provider sets `error`
/// when it refuses the grant.
#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// OAuthFlow
// ---------------------------------------------------------------------------

/// Drives the identity provider endpoints. Does not persist anything; that
/// is the job of [`CredentialManager`](super::manager::CredentialManager).
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    http: reqwest::Client,
    config: IdentityConfig,
}

impl OAuthFlow {
    /// Creates a flow bound to one identity provider configuration.
    pub fn new(http: reqwest::Client, config: IdentityConfig) -> Self {
        Self { http, config }
    }

    /// Builds the authorization URL the operator opens in a browser.
    ///
    /// Only the challenge is included; the verifier never leaves the process
    /// before the token exchange.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Config`] if the configured authorization
    /// endpoint is not a valid URL.
    pub fn authorization_url(&self, pkce: &PkceChallenge) -> Result<Url> {
        let mut url = Url::parse(&self.config.authorize_url).map_err(|e| {
            AirlinkError::Config(format!("invalid authorization endpoint URL: {e}"))
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", METHOD_S256)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("ui_locales", &self.config.ui_locales)
            .append_pair("scope", &self.config.scope);

        Ok(url)
    }

    /// Exchanges an authorization code for a new credential bundle.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProviderRejected`] when the provider refuses the
    /// code and [`AuthError::NetworkFailure`] when it cannot be reached.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<CredentialBundle> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("client_id", &self.config.client_id);
        params.insert("client_secret", &self.config.client_secret);
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.config.redirect_uri);
        params.insert("code_verifier", verifier);

        let issued_at = chrono::Utc::now().timestamp_millis();
        let raw = self.token_request(&params).await?;

        let refresh_token = raw.refresh_token.clone().ok_or_else(|| {
            AirlinkError::Auth(AuthError::ProviderRejected {
                error: "invalid_response".to_string(),
                description: Some("token response did not include a refresh_token".to_string()),
            })
        })?;
        let id_token = raw.id_token.clone().unwrap_or_else(|| {
            tracing::warn!("Token response did not include an id_token");
            String::new()
        });

        into_bundle(raw, issued_at, id_token, refresh_token)
    }

    /// Exchanges the refresh token of `previous` for a new bundle.
    ///
    /// Tokens the provider does not rotate are carried forward from
    /// `previous`.
    ///
    /// # Errors
    ///
    /// Same as [`exchange_code`](Self::exchange_code).
    pub async fn refresh(&self, previous: &CredentialBundle) -> Result<CredentialBundle> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("client_id", &self.config.client_id);
        params.insert("client_secret", &self.config.client_secret);
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", &previous.refresh_token);

        let issued_at = chrono::Utc::now().timestamp_millis();
        let raw = self.token_request(&params).await?;

        let id_token = raw
            .id_token
            .clone()
            .unwrap_or_else(|| previous.id_token.clone());
        let refresh_token = raw
            .refresh_token
            .clone()
            .unwrap_or_else(|| previous.refresh_token.clone());

        into_bundle(raw, issued_at, id_token, refresh_token)
    }

    /// POSTs a form to the token endpoint and classifies the outcome.
    async fn token_request(&self, params: &HashMap<&str, &str>) -> Result<TokenResponse> {
        let grant = params.get("grant_type").copied().unwrap_or_default();
        tracing::debug!("Requesting {} grant from token endpoint", grant);

        let resp = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| AirlinkError::Auth(AuthError::NetworkFailure(e.to_string())))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AirlinkError::Auth(AuthError::NetworkFailure(e.to_string())))?;

        let parsed = serde_json::from_str::<TokenResponse>(&body);

        if let Ok(TokenResponse {
            error: Some(error),
            error_description,
            ..
        }) = &parsed
        {
            return Err(AirlinkError::Auth(AuthError::ProviderRejected {
                error: error.clone(),
                description: error_description.clone(),
            })
            .into());
        }

        if !status.is_success() {
            return Err(AirlinkError::Auth(AuthError::ProviderRejected {
                error: format!("http_{}", status.as_u16()),
                description: Some(body),
            })
            .into());
        }

        parsed.map_err(|e| {
            AirlinkError::Auth(AuthError::ProviderRejected {
                error: "invalid_response".to_string(),
                description: Some(format!("failed to parse token response: {e}")),
            })
            .into()
        })
    }
}

fn into_bundle(
    raw: TokenResponse,
    issued_at: i64,
    id_token: String,
    refresh_token: String,
) -> Result<CredentialBundle> {
    let access_token = raw.access_token.ok_or_else(|| {
        AirlinkError::Auth(AuthError::ProviderRejected {
            error: "invalid_response".to_string(),
            description: Some("token response did not include an access_token".to_string()),
        })
    })?;

    let mut bundle = CredentialBundle::issued_at(
        issued_at,
        access_token,
        id_token,
        refresh_token,
        raw.expires_in,
    );
    bundle.extra = raw.extra;
    Ok(bundle)
}

// ---------------------------------------------------------------------------
// Redirect parsing
// ---------------------------------------------------------------------------

/// Extracts the authorization `code` from a pasted redirect URL.
///
/// Custom-scheme URLs parse normally; when the paste is not a valid URL (for
/// example a bare query string or a URL mangled by a terminal), a literal
/// `code=` parameter scan is used instead.
///
/// # Errors
///
/// Returns [`AuthError::MissingCode`] when no non-empty `code` is present.
///
/// # Examples
///
/// ```
/// use airlink::auth::flow::extract_code;
///
/// let code = extract_code("com.philips.air://loginredirect?code=abc123&state=x").unwrap();
/// assert_eq!(code, "abc123");
/// assert!(extract_code("com.philips.air://loginredirect?error=access_denied").is_err());
/// ```
pub fn extract_code(redirect_url: &str) -> std::result::Result<String, AuthError> {
    let redirect_url = redirect_url.trim();

    let from_url = Url::parse(redirect_url).ok().and_then(|url| {
        url.query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
    });

    let code = from_url.or_else(|| scan_code_param(redirect_url));

    match code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(AuthError::MissingCode),
    }
}

fn scan_code_param(raw: &str) -> Option<String> {
    let query = raw.split_once('?').map(|(_, q)| q).unwrap_or(raw);
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
}
