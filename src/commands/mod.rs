/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `auth`     -- `login`, `logout` and `status`
- `devices`  -- list the devices on the account
- `control`  -- one-shot `on`/`off`/`mode` and the interactive `run` loop

Handlers build their collaborators from [`Config`] through [`Services`] and
print operator-facing output; everything else lives in the library modules.
*/

use std::sync::Arc;
use std::time::Duration;

use crate::auth::prompt::StdinPrompt;
use crate::auth::{CredentialManager, TokenStore};
use crate::cloud::DirectoryClient;
use crate::config::Config;
use crate::error::{AirlinkError, Result};

// Line input for the control loop
pub mod readline;
// Control-loop line parser
pub mod special_commands;

/// Collaborators shared by the command handlers.
pub struct Services {
    pub credentials: Arc<CredentialManager>,
    pub directory: DirectoryClient,
}

impl Services {
    /// Builds the credential manager (stdin redirect prompt) and the
    /// directory client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Config`] if the credential path cannot be
    /// resolved or an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.request_timeout_seconds))
            .build()
            .map_err(|e| AirlinkError::Config(format!("failed to build HTTP client: {e}")))?;

        let store = TokenStore::new(config.storage.resolve_credentials_path()?);
        tracing::debug!("Credential file: {}", store.path().display());

        let credentials = Arc::new(CredentialManager::new(
            http.clone(),
            config.identity.clone(),
            store,
            Arc::new(StdinPrompt),
        ));
        let directory = DirectoryClient::with_client(http, &config.api);

        Ok(Self {
            credentials,
            directory,
        })
    }
}

/// Auth commands
pub mod auth {
    use super::*;
    use crate::auth::CredentialStatus;
    use colored::Colorize;

    /// Forces the interactive login and stores the new credentials.
    pub async fn login(config: &Config) -> Result<()> {
        let services = Services::from_config(config)?;
        let bundle = services.credentials.login().await?;
        match bundle.expires_at_utc() {
            Some(at) => println!("{} (access token valid until {})", "Logged in".green(), at),
            None => println!("{}", "Logged in".green()),
        }
        Ok(())
    }

    /// Deletes stored credentials.
    pub fn logout(config: &Config) -> Result<()> {
        let services = Services::from_config(config)?;
        services.credentials.logout()?;
        println!("Stored credentials removed");
        Ok(())
    }

    /// Prints the state of the stored credentials without network access.
    pub fn status(config: &Config) -> Result<()> {
        let services = Services::from_config(config)?;
        println!("{}", describe(&services.credentials.status()));
        Ok(())
    }

    /// One-line description of `status`.
    pub fn describe(status: &CredentialStatus) -> String {
        let when = |at: &Option<chrono::DateTime<chrono::Utc>>| {
            at.map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        };
        match status {
            CredentialStatus::Missing => {
                format!("{} run `airlink login`", "Not logged in:".yellow())
            }
            CredentialStatus::Valid { expires_at } => {
                format!("{} expires {}", "Logged in:".green(), when(expires_at))
            }
            CredentialStatus::Expired { expires_at } => format!(
                "{} expired {}; it will be refreshed on next use",
                "Access token".yellow(),
                when(expires_at)
            ),
        }
    }

}

/// Device listing
pub mod devices {
    use super::*;
    use colored::Colorize;

    /// Lists the devices on the account. The first one is the one the
    /// control commands use.
    pub async fn list(config: &Config) -> Result<()> {
        let services = Services::from_config(config)?;
        let bundle = services.credentials.ensure_valid_credential().await?;
        let devices = services.directory.list_devices(&bundle.access_token).await?;

        if devices.is_empty() {
            println!("{}", AirlinkError::NoDevices.to_string().yellow());
            return Ok(());
        }

        for (i, device) in devices.iter().enumerate() {
            let marker = if i == 0 { "*".green().to_string() } else { " ".to_string() };
            println!(
                "{} {}  thing={}  id={}",
                marker, device.friendly_name, device.thing_name, device.device_id
            );
        }
        Ok(())
    }
}

/// Device control
pub mod control {
    use super::*;
    use crate::bridge::Bridge;
    use crate::commands::readline::{terminal_reader, ReadOutcome};
    use crate::commands::special_commands::{parse_special_command, print_help, SpecialCommand};
    use crate::control::controller::{apply, request};
    use crate::control::{reported_power, ControlOp, SessionEvent};
    use colored::Colorize;
    use tokio::sync::broadcast;

    const PROMPT: &str = "airlink> ";

    /// Connects, applies `op` once and disconnects.
    pub async fn once(config: &Config, op: ControlOp) -> Result<()> {
        let services = Services::from_config(config)?;
        let Some(bridge) = start(&services, config).await? else {
            return Ok(());
        };

        let outcome = apply(bridge.controller().as_ref(), op).await;
        bridge.shutdown().await;
        outcome?;

        println!("{} {}", "Sent".green(), describe_op(op));
        Ok(())
    }

    /// Keeps the session open and applies commands read from stdin.
    pub async fn run(config: &Config) -> Result<()> {
        let services = Services::from_config(config)?;
        let Some(mut bridge) = start(&services, config).await? else {
            return Ok(());
        };

        let events = tokio::spawn(log_events(bridge.take_events()));
        let (tx, listener) = bridge.spawn_listener(8);

        println!(
            "Controlling {}. Type 'help' for commands.",
            bridge.device().friendly_name.bold()
        );

        let mut reader = terminal_reader()?;
        loop {
            let outcome = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                outcome = reader.next_line(PROMPT) => outcome,
            };
            let line = match outcome {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Interrupted | ReadOutcome::Eof => break,
                ReadOutcome::Failed(e) => {
                    eprintln!("{}", format!("Input error: {}", e).red());
                    break;
                }
            };

            match parse_special_command(&line) {
                Ok(SpecialCommand::Control(op)) => match request(&tx, op).await {
                    Ok(()) => println!("{} {}", "Sent".green(), describe_op(op)),
                    Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
                },
                Ok(SpecialCommand::Help) => print_help(),
                Ok(SpecialCommand::Exit) => break,
                Ok(SpecialCommand::None) => {}
                Err(e) => eprintln!("{}", e.to_string().red()),
            }
        }

        drop(tx);
        if let Err(e) = listener.await {
            tracing::warn!("Control listener ended abnormally: {}", e);
        }
        bridge.shutdown().await;
        events.abort();
        println!("Disconnected");
        Ok(())
    }

    async fn start(services: &Services, config: &Config) -> Result<Option<Bridge>> {
        let bridge = Bridge::start(services.credentials.clone(), &services.directory, &config.mqtt).await?;
        if bridge.is_none() {
            println!("{}", AirlinkError::NoDevices.to_string().yellow());
        }
        Ok(bridge)
    }

    async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Message { topic, payload }) => match reported_power(&payload) {
                    Some(on) => tracing::info!("Device reports power {}", if on { "on" } else { "off" }),
                    None => tracing::debug!("Message on {} ({} bytes)", topic, payload.len()),
                },
                Ok(SessionEvent::Error(e)) => tracing::warn!("Session error: {}", e),
                Ok(SessionEvent::Connected) => tracing::info!("Session connected"),
                Ok(SessionEvent::Disconnected) => tracing::info!("Session disconnected"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Skipped {} session events", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Operator-facing description of `op`.
    pub fn describe_op(op: ControlOp) -> String {
        match op {
            ControlOp::PowerOn => "power on".to_string(),
            ControlOp::PowerOff => "power off".to_string(),
            ControlOp::SetMode(mode) => format!("mode {} ({})", mode, mode.value()),
        }
    }

}
