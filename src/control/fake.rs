//! In-process fake publisher for control tests
//!
//! [`FakePublisher::new`] returns a `(FakePublisher, FakePublisherHandle)`
//! pair. Wire the publisher into a
//! [`DeviceController`](crate::control::controller::DeviceController) and read
//! what it published from the handle:
//!
//! ```text
//! controller.power_on() -> publisher.publish() -> published_tx -> handle.published_rx
//! ```
//!
//! # Example
//!
//! ```
//! use airlink::control::fake::FakePublisher;
//! use airlink::control::session::CommandPublisher;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (publisher, mut handle) = FakePublisher::new();
//! publisher.publish("a/b", b"{}".to_vec()).await.unwrap();
//!
//! let sent = handle.published_rx.recv().await.unwrap();
//! assert_eq!(sent.topic, "a/b");
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::control::session::CommandPublisher;
use crate::error::{AirlinkError, Result};

/// A message captured by [`FakePublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("FakePublisher: payload is not JSON")
    }
}

/// Records publishes instead of sending them to a broker.
#[derive(Debug)]
pub struct FakePublisher {
    published_tx: mpsc::UnboundedSender<PublishedMessage>,
    offline: AtomicBool,
}

/// Test-side end of a [`FakePublisher`].
#[derive(Debug)]
pub struct FakePublisherHandle {
    /// Receives every message the code under test published.
    pub published_rx: mpsc::UnboundedReceiver<PublishedMessage>,
}

impl FakePublisher {
    /// Creates a connected fake and its handle.
    pub fn new() -> (Self, FakePublisherHandle) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        (
            Self {
                published_tx,
                offline: AtomicBool::new(false),
            },
            FakePublisherHandle { published_rx },
        )
    }

    /// While offline, `publish` fails like a session whose request queue is
    /// gone.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl CommandPublisher for FakePublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AirlinkError::Session(format!("failed to queue publish to {topic}: offline")).into());
        }
        self.published_tx
            .send(PublishedMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| AirlinkError::Session("FakePublisher handle dropped".to_string()))?;
        Ok(())
    }
}
