//! Transport seam between the connection manager and the wire.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    packet::PacketError,
    protocol::{InboundEvent, OutboundEvent},
};

/// Where a session connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Socket.IO request path, e.g. `/socket.io/`.
    pub path: String,
}

impl Endpoint {
    /// Websocket URL, restricted to the websocket transport.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "ws://{}:{}{}?EIO=4&transport=websocket",
            self.host, self.port, self.path
        )
    }
}

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Transport closed")]
    Closed,
}

/// One live link to the remote process.
#[async_trait]
pub trait Transport: Send {
    /// Next inbound event, or `None` once the link is gone.
    ///
    /// Must be cancel-safe: it is raced against outbound work and shutdown.
    async fn next_event(&mut self) -> Option<InboundEvent>;

    /// Send an event to the remote side.
    async fn emit(&mut self, event: OutboundEvent) -> Result<(), TransportError>;

    /// Close the link and release its resources.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// Open a link to `endpoint`.
    async fn open(&self, endpoint: &Endpoint) -> Result<Self::Transport, TransportError>;
}
