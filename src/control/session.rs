//! Authenticated MQTT control session
//!
//! The vendor broker is AWS IoT Core behind a custom authorizer. The client
//! presents no certificate and no username/password; authorization rides on
//! HTTP headers of the WebSocket upgrade request:
//!
//! ```text
//! token-header:                      Bearer <access token>
//! x-amz-customauthorizer-signature:  <signature from the directory API>
//! x-amz-customauthorizer-name:       CustomAuthorizer
//! tenant:                            da
//! ```
//!
//! [`ControlSession::connect`] spawns one task that drives the `rumqttc`
//! event loop. The task re-subscribes to the shadow accepted topic after
//! every ConnAck, forwards inbound publishes as [`SessionEvent::Message`] and
//! reports every connection error as an event. Polling again after an error
//! reconnects, so reconnection happens at a fixed delay until
//! [`SessionHandle::shutdown`] is called.
//!
//! Every connection attempt presents a freshly minted grant. Sessions opened
//! with [`ControlSession::connect_with_source`] ask their [`GrantSource`]
//! for a new signature and bearer token before each reconnect. Sessions
//! opened with a fixed grant only get a new client id.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MqttConfig;
use crate::control::protocol::shadow_accepted_topic;
use crate::error::{AirlinkError, Result};

/// Capacity of the session event broadcast channel. Slow subscribers lag
/// and lose the oldest events; the I/O task never waits on them.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the rumqttc request queue between client and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Upper bound on draining queued requests during shutdown.
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Upgrade header carrying the bearer token.
pub const TOKEN_HEADER: &str = "token-header";
/// Upgrade header carrying the authorizer signature.
pub const SIGNATURE_HEADER: &str = "x-amz-customauthorizer-signature";
/// Upgrade header naming the custom authorizer.
pub const AUTHORIZER_NAME_HEADER: &str = "x-amz-customauthorizer-name";
/// Upgrade header naming the vendor tenant.
pub const TENANT_HEADER: &str = "tenant";

// ---------------------------------------------------------------------------
// MqttConnectionGrant
// ---------------------------------------------------------------------------

/// Everything needed to open one session.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttConnectionGrant {
    /// Account the grant was minted for
    pub account_id: String,
    /// `{account_id}_{uuid}`, unique per attempt
    pub client_id: String,
    /// Custom authorizer signature
    pub authorizer_signature: String,
    /// Current access token
    pub bearer_token: String,
}

impl MqttConnectionGrant {
    /// Mints a grant with a fresh client id for `account_id`.
    pub fn mint(
        account_id: &str,
        authorizer_signature: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            client_id: format!("{}_{}", account_id, uuid::Uuid::new_v4()),
            authorizer_signature: authorizer_signature.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Same credentials under a new client id.
    pub fn with_new_client_id(&self) -> Self {
        Self::mint(
            &self.account_id,
            self.authorizer_signature.clone(),
            self.bearer_token.clone(),
        )
    }
}

impl fmt::Debug for MqttConnectionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConnectionGrant")
            .field("account_id", &self.account_id)
            .field("client_id", &self.client_id)
            .field("authorizer_signature", &"<redacted>")
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Events and publishing
// ---------------------------------------------------------------------------

/// Notification from the session I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// ConnAck received; the accepted topic subscription has been queued
    Connected,
    /// Inbound publish, payload forwarded unparsed
    Message {
        /// Topic the message arrived on
        topic: String,
        /// Raw payload bytes
        payload: Vec<u8>,
    },
    /// Connection or protocol error; the session keeps reconnecting
    Error(String),
    /// Connection lost or session shut down
    Disconnected,
}

/// Fire-and-forget publishing seam between the device protocols and the
/// transport.
#[async_trait::async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Queues `payload` for `topic` at QoS 1 without waiting for an
    /// acknowledgement.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Mints the grant for the next connection attempt.
///
/// The authorizer signature is time-scoped and the bearer token expires, so
/// a session that outlives either needs new ones to reconnect.
#[async_trait::async_trait]
pub trait GrantSource: Send + Sync {
    /// Returns a grant with a new client id and current credentials.
    async fn next_grant(&self) -> Result<MqttConnectionGrant>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Upgrade request headers for `grant`, in the order they are applied.
pub fn upgrade_headers(
    grant: &MqttConnectionGrant,
    config: &MqttConfig,
) -> Vec<(&'static str, String)> {
    vec![
        (TOKEN_HEADER, format!("Bearer {}", grant.bearer_token)),
        (SIGNATURE_HEADER, grant.authorizer_signature.clone()),
        (AUTHORIZER_NAME_HEADER, config.authorizer_name.clone()),
        (TENANT_HEADER, config.tenant.clone()),
    ]
}

/// Builds the rumqttc options for a WebSocket session.
///
/// # Errors
///
/// Returns [`AirlinkError::Config`] when the broker URL is not a `ws`/`wss`
/// URL and [`AirlinkError::Session`] when the client id is unusable.
pub fn mqtt_options(grant: &MqttConnectionGrant, config: &MqttConfig) -> Result<MqttOptions> {
    let url = url::Url::parse(&config.url)
        .map_err(|e| AirlinkError::Config(format!("invalid MQTT URL {}: {e}", config.url)))?;

    let transport = match url.scheme() {
        "wss" => Transport::wss_with_default_config(),
        "ws" => Transport::Ws,
        other => {
            return Err(AirlinkError::Config(format!(
                "MQTT URL must use ws or wss, got {other}"
            ))
            .into())
        }
    };
    let port = url.port_or_known_default().unwrap_or(443);

    if grant.client_id.trim().is_empty() || grant.client_id.starts_with(char::is_whitespace) {
        return Err(AirlinkError::Session("MQTT client id is empty".to_string()).into());
    }

    let mut options = MqttOptions::new(grant.client_id.clone(), config.url.clone(), port);
    options
        .set_transport(transport)
        .set_keep_alive(Duration::from_secs(config.keep_alive_seconds))
        .set_clean_session(true);

    let headers = upgrade_headers(grant, config);
    options.set_request_modifier(move |mut request: http::Request<()>| {
        let headers = headers.clone();
        async move {
            for (name, value) in headers {
                match http::HeaderValue::from_str(&value) {
                    Ok(value) => {
                        request.headers_mut().insert(name, value);
                    }
                    Err(_) => tracing::warn!("Dropping invalid {} upgrade header value", name),
                }
            }
            request
        }
    });

    Ok(options)
}

// ---------------------------------------------------------------------------
// ControlSession
// ---------------------------------------------------------------------------

/// Entry point for opening control sessions.
pub struct ControlSession;

impl ControlSession {
    /// Starts a session for `thing_name` and returns its handle together
    /// with a receiver that sees every event from the first one on.
    ///
    /// The connection is established in the background; use
    /// [`SessionHandle::wait_connected`] to wait for the first ConnAck.
    /// Reconnects reuse the credentials of `grant` under a new client id.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error only when the options cannot be built. Network
    /// failures are reported as [`SessionEvent::Error`].
    pub fn connect(
        grant: &MqttConnectionGrant,
        thing_name: &str,
        config: &MqttConfig,
    ) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>)> {
        Self::open(grant, thing_name, config, None)
    }

    /// Like [`connect`](Self::connect), but every reconnect first asks
    /// `source` for a new grant. If the source fails, the attempt goes ahead
    /// with the previous credentials and the failure is reported as
    /// [`SessionEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns an error only when the options cannot be built.
    pub fn connect_with_source(
        grant: &MqttConnectionGrant,
        thing_name: &str,
        config: &MqttConfig,
        source: Arc<dyn GrantSource>,
    ) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>)> {
        Self::open(grant, thing_name, config, Some(source))
    }

    fn open(
        grant: &MqttConnectionGrant,
        thing_name: &str,
        config: &MqttConfig,
        source: Option<Arc<dyn GrantSource>>,
    ) -> Result<(SessionHandle, broadcast::Receiver<SessionEvent>)> {
        let options = mqtt_options(grant, config)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        tracing::info!(
            "Opening MQTT session {} to {}",
            grant.client_id,
            config.url
        );

        let driver = EventLoopDriver {
            eventloop,
            client: client.clone(),
            accepted_topic: shadow_accepted_topic(thing_name),
            events: events_tx.clone(),
            connected: connected_tx,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_seconds),
            cancel: cancel.clone(),
            grant: grant.clone(),
            source,
            config: config.clone(),
        };
        let task = tokio::spawn(driver.run());

        let handle = SessionHandle {
            client,
            events: events_tx,
            connected: connected_rx,
            cancel,
            task: Mutex::new(Some(task)),
        };
        Ok((handle, events_rx))
    }
}

struct EventLoopDriver {
    eventloop: EventLoop,
    client: AsyncClient,
    accepted_topic: String,
    events: broadcast::Sender<SessionEvent>,
    connected: watch::Sender<bool>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
    grant: MqttConnectionGrant,
    source: Option<Arc<dyn GrantSource>>,
    config: MqttConfig,
}

impl EventLoopDriver {
    async fn run(mut self) {
        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    tracing::debug!(
                        "Received {} bytes on {}",
                        publish.payload.len(),
                        publish.topic
                    );
                    self.emit(SessionEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "MQTT connection error: {}. Reconnecting in {}s",
                        e,
                        self.reconnect_delay.as_secs()
                    );
                    let was_connected = self.connected.send_replace(false);
                    self.emit(SessionEvent::Error(e.to_string()));
                    if was_connected {
                        self.emit(SessionEvent::Disconnected);
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                    if !self.renew_grant().await {
                        break;
                    }
                }
            }
        }

        self.close().await;
    }

    /// Installs a new grant for the next attempt. Returns `false` when the
    /// session was cancelled meanwhile.
    async fn renew_grant(&mut self) -> bool {
        let next = match self.source.clone() {
            Some(source) => {
                let minted = tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    minted = source.next_grant() => minted,
                };
                match minted {
                    Ok(grant) => grant,
                    Err(e) => {
                        tracing::warn!("Could not renew the connection grant: {:#}", e);
                        self.emit(SessionEvent::Error(format!(
                            "failed to renew connection grant: {e:#}"
                        )));
                        self.grant.with_new_client_id()
                    }
                }
            }
            None => self.grant.with_new_client_id(),
        };

        match mqtt_options(&next, &self.config) {
            Ok(options) => {
                tracing::debug!("Reconnecting as {}", next.client_id);
                self.eventloop.mqtt_options = options;
                self.grant = next;
            }
            Err(e) => tracing::warn!("Keeping the previous connection options: {:#}", e),
        }
        true
    }

    fn on_connected(&self) {
        tracing::info!("MQTT session connected as {}", self.grant.client_id);

        // Queued ahead of anything published once `connected` flips.
        if let Err(e) = self
            .client
            .try_subscribe(self.accepted_topic.as_str(), QoS::AtLeastOnce)
        {
            tracing::warn!("Failed to subscribe to {}: {}", self.accepted_topic, e);
            self.emit(SessionEvent::Error(format!(
                "failed to subscribe to {}: {e}",
                self.accepted_topic
            )));
        } else {
            tracing::debug!("Subscribed to {}", self.accepted_topic);
        }

        self.connected.send_replace(true);
        self.emit(SessionEvent::Connected);
    }

    async fn close(mut self) {
        let was_connected = *self.connected.borrow();
        if was_connected && self.client.try_disconnect().is_ok() {
            // Requests are sent in order, so queued publishes go out first.
            let eventloop = &mut self.eventloop;
            let flush = async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            };
            if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush).await.is_err() {
                tracing::debug!("Gave up flushing the MQTT request queue");
            }
        }
        self.connected.send_replace(false);
        self.emit(SessionEvent::Disconnected);
        tracing::info!("MQTT session closed");
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Handle to a running session. Dropping it does not stop the session; call
/// [`shutdown`](Self::shutdown).
pub struct SessionHandle {
    client: AsyncClient,
    events: broadcast::Sender<SessionEvent>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// New receiver for events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether the last ConnAck has not been followed by an error.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the broker has accepted the connection.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Session`] when `timeout` elapses first or the
    /// session has been shut down.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut connected = self.connected.clone();
        let outcome = tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map(|waited| waited.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(AirlinkError::Session(
                "session ended before the broker accepted the connection".to_string(),
            )
            .into()),
            Err(_) => Err(AirlinkError::Session(format!(
                "broker did not accept the connection within {}s",
                timeout.as_secs()
            ))
            .into()),
        }
    }

    /// Stops the I/O task, sending DISCONNECT when connected. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("MQTT session task ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl CommandPublisher for SessionHandle {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(AirlinkError::Session(format!(
                "not connected; dropped publish to {topic}"
            ))
            .into());
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| AirlinkError::Session(format!("failed to queue publish to {topic}: {e}")))?;
        tracing::debug!("Queued publish to {}", topic);
        Ok(())
    }
}
