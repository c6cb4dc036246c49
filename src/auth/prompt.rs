//! Out-of-band capture of the login redirect
//!
//! The identity provider redirects to a custom-scheme URI
//! (`com.philips.air://loginredirect?code=...`) that no local listener can
//! receive. The operator opens the authorization URL, completes the login and
//! pastes the final redirect URL back. That paste is the only unbounded wait
//! in the credential lifecycle, so [`await_redirect`] wraps every
//! [`RedirectPrompt`] in a deadline and a cancellation token.

use std::io::BufRead;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{AirlinkError, AuthError, Result};

/// Presents an authorization URL and returns the redirect URL the operator
/// pasted back.
#[async_trait::async_trait]
pub trait RedirectPrompt: Send + Sync {
    /// Shows `authorize_url` and waits for one line of input.
    ///
    /// Implementations should return [`AuthError::PromptCancelled`] when the
    /// input source closes without producing a line.
    async fn capture(&self, authorize_url: &str) -> Result<String>;
}

/// Prompts on stderr and reads the redirect URL from stdin.
///
/// The read runs on a detached thread, so a timed out or cancelled prompt
/// never holds up runtime shutdown.
#[derive(Debug, Default)]
pub struct StdinPrompt;

#[async_trait::async_trait]
impl RedirectPrompt for StdinPrompt {
    async fn capture(&self, authorize_url: &str) -> Result<String> {
        eprintln!("Open the following URL in a browser and sign in:\n\n{authorize_url}\n");
        eprintln!(
            "The browser ends on a page it cannot open (com.philips.air://...). \
             Copy that full address from the developer tools network tab and paste it here:"
        );

        match read_line_detached(std::io::BufReader::new(std::io::stdin()))?.await {
            Ok(Ok(Some(line))) => Ok(line.trim().to_string()),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(None)) | Err(_) => Err(AirlinkError::Auth(AuthError::PromptCancelled).into()),
        }
    }
}

/// Reads one line from `input` on a thread that is never joined. `None`
/// means end of input.
fn read_line_detached<R>(
    mut input: R,
) -> std::io::Result<oneshot::Receiver<std::io::Result<Option<String>>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("airlink-redirect-prompt".to_string())
        .spawn(move || {
            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .map(|n| (n > 0).then_some(line));
            // The prompt may have given up already.
            let _ = tx.send(read);
        })?;
    Ok(rx)
}

/// A prompt that answers with a fixed redirect URL and remembers every
/// authorization URL it was shown. Used by tests and non-interactive callers
/// that obtained the redirect by other means.
#[derive(Debug)]
pub struct StaticPrompt {
    redirect_url: String,
    shown: Mutex<Vec<String>>,
}

impl StaticPrompt {
    /// Creates a prompt that always returns `redirect_url`.
    pub fn new(redirect_url: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Authorization URLs presented so far, oldest first.
    pub fn shown_urls(&self) -> Vec<String> {
        self.shown.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RedirectPrompt for StaticPrompt {
    async fn capture(&self, authorize_url: &str) -> Result<String> {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(authorize_url.to_string());
        }
        Ok(self.redirect_url.clone())
    }
}

/// Runs `prompt` with a deadline and a cancellation path.
///
/// # Errors
///
/// Returns [`AuthError::PromptTimedOut`] when `timeout` elapses first and
/// [`AuthError::PromptCancelled`] when `cancel` fires first. Errors from the
/// prompt itself are passed through.
pub async fn await_redirect(
    prompt: &dyn RedirectPrompt,
    authorize_url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    tokio::select! {
        _ = cancel.cancelled() => {
            Err(AirlinkError::Auth(AuthError::PromptCancelled).into())
        }
        outcome = tokio::time::timeout(timeout, prompt.capture(authorize_url)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AirlinkError::Auth(AuthError::PromptTimedOut(timeout.as_secs())).into()),
        },
    }
}
