//! Device control surface
//!
//! [`DeviceController`] turns operator intents into protocol messages for the
//! one device the bridge is bound to. Other tasks never touch the session
//! directly; they either hold a [`ControlSurface`] or send [`ControlRequest`]s
//! to a listener spawned with [`spawn_control_listener`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cloud::DeviceIdentity;
use crate::control::protocol::{ControlCommand, FanMode};
use crate::control::session::CommandPublisher;
use crate::error::{AirlinkError, Result};

/// Operations exposed to whoever drives the purifier.
#[async_trait::async_trait]
pub trait ControlSurface: Send + Sync {
    /// Switches the device on (shadow protocol).
    async fn power_on(&self) -> Result<()>;

    /// Switches the device off (shadow protocol).
    async fn power_off(&self) -> Result<()>;

    /// Selects a fan mode (direct command protocol).
    async fn set_mode(&self, mode: FanMode) -> Result<()>;
}

/// Publishes commands for a single device.
pub struct DeviceController {
    publisher: Arc<dyn CommandPublisher>,
    device: DeviceIdentity,
    namespace: String,
}

impl DeviceController {
    /// Binds `device` to `publisher`. `namespace` prefixes the direct
    /// command topic (`da_ctrl` in production).
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        device: DeviceIdentity,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            device,
            namespace: namespace.into(),
        }
    }

    /// The controlled device.
    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Serializes and publishes `command` without waiting for a reply.
    pub async fn send(&self, command: ControlCommand) -> Result<()> {
        let topic = command.topic(&self.device.thing_name, &self.namespace);
        let payload = serde_json::to_vec(&command.payload())?;
        self.publisher.publish(&topic, payload).await
    }
}

#[async_trait::async_trait]
impl ControlSurface for DeviceController {
    async fn power_on(&self) -> Result<()> {
        tracing::info!("Powering on {}", self.device.friendly_name);
        self.send(ControlCommand::power(true)).await
    }

    async fn power_off(&self) -> Result<()> {
        tracing::info!("Powering off {}", self.device.friendly_name);
        self.send(ControlCommand::power(false)).await
    }

    async fn set_mode(&self, mode: FanMode) -> Result<()> {
        tracing::info!(
            "Setting {} to {} mode ({})",
            self.device.friendly_name,
            mode,
            mode.value()
        );
        self.send(ControlCommand::set_mode(mode, Utc::now())).await
    }
}

// ---------------------------------------------------------------------------
// Message-passing front end
// ---------------------------------------------------------------------------

/// Operation requested by another task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    /// Desired shadow state `powerOn: true`
    PowerOn,
    /// Desired shadow state `powerOn: false`
    PowerOff,
    /// Direct `setPort` command for the fan mode
    SetMode(FanMode),
}

/// A [`ControlOp`] with an optional reply channel for the publish outcome.
#[derive(Debug)]
pub struct ControlRequest {
    /// What to do
    pub op: ControlOp,
    /// Receives `Ok(())` once the command is queued, or the error text.
    /// `None` means the outcome is only logged.
    pub reply: Option<oneshot::Sender<std::result::Result<(), String>>>,
}

impl ControlRequest {
    /// Request whose outcome is only logged.
    pub fn fire(op: ControlOp) -> Self {
        Self { op, reply: None }
    }

    /// Request plus the receiver of its outcome.
    pub fn with_reply(op: ControlOp) -> (Self, oneshot::Receiver<std::result::Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                op,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Applies one operation to `surface`.
pub async fn apply(surface: &dyn ControlSurface, op: ControlOp) -> Result<()> {
    match op {
        ControlOp::PowerOn => surface.power_on().await,
        ControlOp::PowerOff => surface.power_off().await,
        ControlOp::SetMode(mode) => surface.set_mode(mode).await,
    }
}

/// Spawns a task applying requests from `rx` to `surface` in arrival order.
/// The task ends when every sender is dropped.
pub fn spawn_control_listener(
    mut rx: mpsc::Receiver<ControlRequest>,
    surface: Arc<dyn ControlSurface>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let outcome = apply(surface.as_ref(), request.op).await;
            if let Err(e) = &outcome {
                tracing::warn!("Control request {:?} failed: {}", request.op, e);
            }
            if let Some(reply) = request.reply {
                let _ = reply.send(outcome.map_err(|e| e.to_string()));
            }
        }
        tracing::debug!("Control listener stopped");
    })
}

/// Sends `op` through `tx` and waits for its outcome.
///
/// # Errors
///
/// Returns [`AirlinkError::Session`] if the listener is gone or the publish
/// failed.
pub async fn request(tx: &mpsc::Sender<ControlRequest>, op: ControlOp) -> Result<()> {
    let (req, reply) = ControlRequest::with_reply(op);
    tx.send(req)
        .await
        .map_err(|_| AirlinkError::Session("control listener has stopped".to_string()))?;
    match reply.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AirlinkError::Session(e).into()),
        Err(_) => Err(AirlinkError::Session("control listener dropped the request".to_string()).into()),
    }
}
