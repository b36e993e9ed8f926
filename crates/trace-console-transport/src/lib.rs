//! Link between the trace console and a remote debug server.
//!
//! Provides:
//! - Socket.IO packet codec and event contract
//! - WebSocket transport (feature: websocket)
//! - `ConnectionManager` - Port-following connection lifecycle
//! - `RemoteExecutionChannel` - Remote code execution

pub mod config;
pub mod connection;
pub mod execution;
pub mod packet;
pub mod protocol;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
pub(crate) mod fake;

pub use config::ConnectionConfig;
pub use connection::{ConnectionManager, ConnectionPhase, ConnectionState, ConsoleEvent};
pub use execution::{ExecuteError, ExecutionOutcome, RemoteExecutionChannel};
pub use protocol::{ConsoleLine, ExecutionId, ExecutionResult, InboundEvent, OutboundEvent};
pub use transport::{Connector, Endpoint, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WsConnector, WsTransport};
