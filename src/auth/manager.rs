//! Credential lifecycle manager
//!
//! [`CredentialManager`] is the only entry point the rest of the crate uses
//! to obtain bearer credentials. It coordinates the [`TokenStore`], the
//! [`OAuthFlow`] and a [`RedirectPrompt`]:
//!
//! - [`CredentialManager::ensure_valid_credential`] returns a usable bundle,
//!   refreshing or re-authorizing as necessary.
//! - [`CredentialManager::login`] forces the interactive PKCE login.
//! - [`CredentialManager::logout`] forgets the persisted bundle.
//! - [`CredentialManager::status`] inspects the persisted bundle offline.
//!
//! Every bundle obtained from the provider is persisted before it is
//! returned, so a crash right after an exchange never orphans a valid token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::auth::flow::{extract_code, OAuthFlow};
use crate::auth::pkce;
use crate::auth::prompt::{await_redirect, RedirectPrompt};
use crate::auth::token_store::{CredentialBundle, TokenStore};
use crate::config::IdentityConfig;
use crate::error::{as_auth_error, AirlinkError, Result};

/// Offline view of the persisted credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Nothing stored (or the file is unreadable)
    Missing,
    /// Access token usable without a refresh
    Valid {
        /// Absolute expiry
        expires_at: Option<DateTime<Utc>>,
    },
    /// Access token inside the refresh window or past expiry
    Expired {
        /// Absolute expiry
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Owns login, refresh and validity checks for the bearer credentials.
///
/// Not internally synchronized; the startup sequence is sequential and a
/// single controlling process is assumed.
pub struct CredentialManager {
    flow: OAuthFlow,
    store: TokenStore,
    prompt: Arc<dyn RedirectPrompt>,
    prompt_timeout: Duration,
    cancel: CancellationToken,
}

impl CredentialManager {
    /// Creates a manager.
    ///
    /// # Arguments
    ///
    /// * `http` - HTTP client used for the token endpoint
    /// * `config` - Identity provider settings
    /// * `store` - Credential file accessor
    /// * `prompt` - Source of the pasted redirect URL
    pub fn new(
        http: reqwest::Client,
        config: IdentityConfig,
        store: TokenStore,
        prompt: Arc<dyn RedirectPrompt>,
    ) -> Self {
        let prompt_timeout = config.prompt_timeout();
        Self {
            flow: OAuthFlow::new(http, config),
            store,
            prompt,
            prompt_timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to abort a pending redirect prompt.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token cancelling a pending redirect prompt.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns a credential bundle whose access token is valid for at least
    /// another minute.
    ///
    /// Resolution order:
    ///
    /// 1. Load the persisted bundle. Absent or unreadable: full login.
    /// 2. Fresh (`now < expires_at - 60s`): return it, no network call.
    /// 3. Otherwise refresh; on success persist and return.
    /// 4. Refresh failed: one full login. If that fails too, the error is
    ///    terminal and carries an operator hint.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Auth`] when no valid credential could be
    /// obtained.
    pub async fn ensure_valid_credential(&self) -> Result<CredentialBundle> {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable credential file {}: {}",
                    self.store.path().display(),
                    e
                );
                None
            }
        };

        let Some(bundle) = stored else {
            tracing::info!("No stored credentials; starting interactive login");
            return self.login_or_fail().await;
        };

        if bundle.is_fresh() {
            tracing::debug!("Using stored credentials");
            return Ok(bundle);
        }

        tracing::info!("Access token expired or expiring soon, refreshing");
        match self.refresh(&bundle).await {
            Ok(refreshed) => Ok(refreshed),
            Err(e) => {
                tracing::warn!("Token refresh failed: {}. Falling back to full login.", e);
                self.login_or_fail().await
            }
        }
    }

    /// Exchanges the stored refresh token and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Auth`] when the provider rejects the refresh
    /// token, is unreachable, or the new bundle cannot be persisted.
    pub async fn refresh(&self, bundle: &CredentialBundle) -> Result<CredentialBundle> {
        let refreshed = self.flow.refresh(bundle).await?;
        self.store.save(&refreshed)?;
        tracing::info!("Access token refreshed");
        Ok(refreshed)
    }

    /// Runs the interactive PKCE login and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Auth`] with
    /// [`MissingCode`](crate::error::AuthError::MissingCode) when the pasted
    /// URL has no `code` (no token request is made),
    /// [`PromptTimedOut`](crate::error::AuthError::PromptTimedOut) or
    /// [`PromptCancelled`](crate::error::AuthError::PromptCancelled) when no
    /// URL was pasted, and the token endpoint errors of
    /// [`OAuthFlow::exchange_code`].
    pub async fn login(&self) -> Result<CredentialBundle> {
        let challenge = pkce::generate();
        let url = self.flow.authorization_url(&challenge)?;

        let redirect =
            await_redirect(self.prompt.as_ref(), url.as_str(), self.prompt_timeout, &self.cancel)
                .await?;
        let code = extract_code(&redirect).map_err(AirlinkError::Auth)?;

        let bundle = self.flow.exchange_code(&code, &challenge.verifier).await?;
        self.store.save(&bundle)?;
        tracing::info!("Login completed");
        Ok(bundle)
    }

    /// Deletes the persisted bundle.
    pub fn logout(&self) -> Result<()> {
        self.store.delete()?;
        tracing::info!("Removed stored credentials");
        Ok(())
    }

    /// Reports the state of the persisted bundle without any network call.
    pub fn status(&self) -> CredentialStatus {
        match self.store.load() {
            Ok(Some(bundle)) if bundle.is_fresh() => CredentialStatus::Valid {
                expires_at: bundle.expires_at_utc(),
            },
            Ok(Some(bundle)) => CredentialStatus::Expired {
                expires_at: bundle.expires_at_utc(),
            },
            Ok(None) | Err(_) => CredentialStatus::Missing,
        }
    }

    async fn login_or_fail(&self) -> Result<CredentialBundle> {
        match self.login().await {
            Ok(bundle) => Ok(bundle),
            Err(e) => {
                if let Some(auth) = as_auth_error(&e) {
                    tracing::error!("Login failed: {}. {}", auth, auth.operator_hint());
                    let hint = auth.operator_hint();
                    return Err(e.context(format!("login failed; {hint}")));
                }
                Err(e)
            }
        }
    }
}
