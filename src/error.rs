//! Error types for Airlink
//!
//! This module defines the error taxonomy used across the credential manager,
//! the cloud directory client and the control session, using `thiserror` for
//! ergonomic error handling.
//!
//! Network failures are always converted into one of [`AuthError`] or
//! [`ApiError`] before they leave the credential manager or directory client.

use thiserror::Error;

/// Main error type for Airlink operations
#[derive(Error, Debug)]
pub enum AirlinkError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential lifecycle errors (login, refresh, persistence)
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Vendor API errors
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The account has no registered devices. Reported, never fatal.
    #[error("No devices are registered to this account")]
    NoDevices,

    /// Control session errors (MQTT client, publish queue)
    #[error("Session error: {0}")]
    Session(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Failures of the OAuth2 PKCE credential lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The pasted redirect URL carried no `code` query parameter.
    #[error("redirect URL does not contain an authorization code")]
    MissingCode,

    /// The identity provider answered with an error.
    #[error("identity provider rejected the request: {error}{}", description_suffix(.description))]
    ProviderRejected {
        /// Provider error code, or the HTTP status when none was given
        error: String,
        /// Optional human readable description
        description: Option<String>,
    },

    /// The identity provider could not be reached.
    #[error("identity provider unreachable: {0}")]
    NetworkFailure(String),

    /// No redirect URL was supplied before the prompt deadline.
    #[error("timed out after {0}s waiting for the redirect URL")]
    PromptTimedOut(u64),

    /// The redirect prompt was cancelled.
    #[error("login was cancelled")]
    PromptCancelled,

    /// The credential file could not be written.
    #[error("failed to persist credentials: {0}")]
    Storage(String),
}

fn description_suffix(description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!(" ({d})"),
        _ => String::new(),
    }
}

impl AuthError {
    /// Returns a message an operator can act on for a terminal failure.
    pub fn operator_hint(&self) -> &'static str {
        match self {
            AuthError::MissingCode => {
                "paste the complete com.philips.air://loginredirect?code=... URL from the browser"
            }
            AuthError::ProviderRejected { .. } => {
                "run `airlink login` again; the authorization code or refresh token was refused"
            }
            AuthError::NetworkFailure(_) => "check network connectivity and retry",
            AuthError::PromptTimedOut(_) => {
                "run `airlink login` again and paste the redirect URL before the deadline"
            }
            AuthError::PromptCancelled => "run `airlink login` to start a new login",
            AuthError::Storage(_) => "check permissions on the credential file path",
        }
    }
}

/// A vendor API call failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{endpoint} failed{}: {body}", status_suffix(.status_code))]
pub struct ApiError {
    /// Endpoint path that failed, e.g. `/user/self/device`
    pub endpoint: String,
    /// HTTP status, `None` when no response was received
    pub status_code: Option<u16>,
    /// Response body text, or the transport error message
    pub body: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

/// Result type alias for Airlink operations
///
/// Uses `anyhow::Error` so that callers get rich context; classify failures
/// with `err.downcast_ref::<AirlinkError>()`.
pub type Result<T> = anyhow::Result<T>;

/// Extracts the [`AuthError`] carried by an error chain, if any.
pub fn as_auth_error(err: &anyhow::Error) -> Option<&AuthError> {
    match err.downcast_ref::<AirlinkError>() {
        Some(AirlinkError::Auth(auth)) => Some(auth),
        _ => err.downcast_ref::<AuthError>(),
    }
}
