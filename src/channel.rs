//! Contract of the text channel connecting a capture session to the local
//! card service.
//!
//! The transport itself lives outside this crate. A [`ChannelFactory`] builds
//! one [`Channel`] per session and hands it the session's [`ChannelListener`];
//! the channel reports connection outcomes and inbound frames through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

/// Name of the service channel used for card capture.
pub const CHANNEL_NAME: &str = "smartcards";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to send data: {0}")]
    Send(String),

    #[error("Channel closed")]
    Closed,
}

/// Opaque channel configuration, passed through to the factory untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelConfig(pub Map<String, Value>);

impl ChannelConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    ConnectionSucceeded,
    ConnectionFailed,
    DataReceived(String),
}

/// Session-scoped receiver of channel callbacks.
///
/// Calls never block and never run session code: they enqueue the event for
/// the owning session, which handles events one at a time. Events reported
/// after the session settled are dropped.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelListener {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn connection_succeeded(&self) {
        self.emit(ChannelEvent::ConnectionSucceeded);
    }

    pub fn connection_failed(&self) {
        self.emit(ChannelEvent::ConnectionFailed);
    }

    pub fn data_received_text(&self, payload: impl Into<String>) {
        self.emit(ChannelEvent::DataReceived(payload.into()));
    }

    /// Returns `true` once the owning session has settled.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: ChannelEvent) {
        // the session is gone, nothing to deliver to
        let _ = self.tx.send(event);
    }
}

/// A bidirectional text channel to the card service.
#[async_trait]
pub trait Channel: Send {
    /// Starts connecting. The outcome is reported through the listener.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    async fn send_text(&mut self, payload: String) -> Result<(), ChannelError>;

    /// Closes the channel. Must not block, it is also called on drop.
    fn disconnect(&mut self);
}

/// Builds channels for capture sessions.
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        config: &ChannelConfig,
        listener: ChannelListener,
    ) -> Result<Box<dyn Channel>, ChannelError>;
}
