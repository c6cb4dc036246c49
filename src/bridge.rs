//! Startup sequence from stored credentials to a live control surface
//!
//! The steps run strictly in order and each one needs the output of the
//! previous one:
//!
//! 1. [`CredentialManager::ensure_valid_credential`]
//! 2. [`DirectoryClient::resolve_account_id`] with the identity token
//! 3. [`DirectoryClient::list_devices`] and [`select_device`]
//! 4. [`DirectoryClient::get_connection_signature`]
//! 5. [`MqttConnectionGrant::mint`] and [`ControlSession::connect`]
//! 6. [`DeviceController`] over the session
//!
//! An account without devices stops after step 3 and never opens a session.
//!
//! [`Bridge::start`] hands the session a [`DirectoryGrants`] source, so
//! steps 1 and 4 run again before every reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::auth::CredentialManager;
use crate::cloud::{select_device, DeviceIdentity, DirectoryClient};
use crate::config::MqttConfig;
use crate::control::{
    spawn_control_listener, ControlRequest, ControlSession, DeviceController, GrantSource,
    MqttConnectionGrant, SessionEvent, SessionHandle,
};
use crate::error::{AirlinkError, Result};

/// Device and grant resolved by the HTTP half of the startup sequence.
#[derive(Debug, Clone)]
pub struct ConnectionPlan {
    pub device: DeviceIdentity,
    pub grant: MqttConnectionGrant,
}

/// Runs steps 1 to 4.
///
/// Returns `Ok(None)` when the account has no devices. That case is logged
/// and is not an error.
///
/// # Errors
///
/// Propagates the credential manager and directory client errors.
pub async fn prepare(
    credentials: &CredentialManager,
    directory: &DirectoryClient,
) -> Result<Option<ConnectionPlan>> {
    let bundle = credentials.ensure_valid_credential().await?;

    let account_id = directory.resolve_account_id(&bundle.id_token).await?;
    tracing::debug!("Resolved account id");

    let devices = directory.list_devices(&bundle.access_token).await?;
    let device = match select_device(&devices) {
        Ok(device) => device,
        Err(e) if matches!(e.downcast_ref::<AirlinkError>(), Some(AirlinkError::NoDevices)) => {
            tracing::warn!("No devices are registered to this account; not connecting");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    if devices.len() > 1 {
        tracing::info!(
            "{} devices on the account; using the first one ({})",
            devices.len(),
            device.friendly_name
        );
    }

    let signature = directory
        .get_connection_signature(&bundle.access_token)
        .await?;

    Ok(Some(ConnectionPlan {
        device,
        grant: MqttConnectionGrant::mint(&account_id, signature, bundle.access_token),
    }))
}

/// Mints connection grants from the current credential and a new
/// signature.
pub struct DirectoryGrants {
    credentials: Arc<CredentialManager>,
    directory: DirectoryClient,
    account_id: String,
}

impl DirectoryGrants {
    /// Creates a source minting grants for `account_id`.
    pub fn new(
        credentials: Arc<CredentialManager>,
        directory: DirectoryClient,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            directory,
            account_id: account_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl GrantSource for DirectoryGrants {
    async fn next_grant(&self) -> Result<MqttConnectionGrant> {
        let bundle = self.credentials.ensure_valid_credential().await?;
        let signature = self
            .directory
            .get_connection_signature(&bundle.access_token)
            .await?;
        tracing::debug!("Minted a new connection grant");
        Ok(MqttConnectionGrant::mint(
            &self.account_id,
            signature,
            bundle.access_token,
        ))
    }
}

/// A connected session plus the controller bound to it.
pub struct Bridge {
    device: DeviceIdentity,
    session: Arc<SessionHandle>,
    controller: Arc<DeviceController>,
    events: broadcast::Receiver<SessionEvent>,
}

impl Bridge {
    /// Runs steps 5 and 6 and waits for the first ConnAck. Reconnects reuse
    /// the credentials of `plan.grant`.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Session`] when the broker does not accept the
    /// connection within the configured timeout. The session is shut down
    /// in that case.
    pub async fn connect(plan: ConnectionPlan, config: &MqttConfig) -> Result<Self> {
        let opened = ControlSession::connect(&plan.grant, &plan.device.thing_name, config)?;
        Self::finish(plan, opened, config).await
    }

    /// Like [`connect`](Self::connect), with `source` minting the grant of
    /// every reconnect.
    pub async fn connect_with_source(
        plan: ConnectionPlan,
        source: Arc<dyn GrantSource>,
        config: &MqttConfig,
    ) -> Result<Self> {
        let opened = ControlSession::connect_with_source(
            &plan.grant,
            &plan.device.thing_name,
            config,
            source,
        )?;
        Self::finish(plan, opened, config).await
    }

    async fn finish(
        plan: ConnectionPlan,
        (session, events): (SessionHandle, broadcast::Receiver<SessionEvent>),
        config: &MqttConfig,
    ) -> Result<Self> {
        let session = Arc::new(session);

        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        if let Err(e) = session.wait_connected(timeout).await {
            session.shutdown().await;
            return Err(e);
        }

        let controller = Arc::new(DeviceController::new(
            session.clone(),
            plan.device.clone(),
            config.command_namespace.clone(),
        ));

        tracing::info!(
            "Connected to {} ({})",
            plan.device.friendly_name,
            plan.device.thing_name
        );

        Ok(Self {
            device: plan.device,
            session,
            controller,
            events,
        })
    }

    /// Runs the whole startup sequence.
    ///
    /// Returns `Ok(None)` when the account has no devices.
    pub async fn start(
        credentials: Arc<CredentialManager>,
        directory: &DirectoryClient,
        config: &MqttConfig,
    ) -> Result<Option<Self>> {
        let Some(plan) = prepare(&credentials, directory).await? else {
            return Ok(None);
        };
        let source = Arc::new(DirectoryGrants::new(
            credentials,
            directory.clone(),
            plan.grant.account_id.clone(),
        ));
        Ok(Some(Self::connect_with_source(plan, source, config).await?))
    }

    /// The controlled device.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Controller for the device.
    pub fn controller(&self) -> Arc<DeviceController> {
        self.controller.clone()
    }

    /// Receiver holding every session event since connect.
    pub fn take_events(&mut self) -> broadcast::Receiver<SessionEvent> {
        std::mem::replace(&mut self.events, self.session.subscribe())
    }

    /// Spawns a control listener and returns its request sender.
    pub fn spawn_listener(&self, capacity: usize) -> (mpsc::Sender<ControlRequest>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = spawn_control_listener(rx, self.controller.clone());
        (tx, task)
    }

    /// Disconnects and stops the session task.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}
