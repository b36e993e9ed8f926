//! Connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::Endpoint;

/// Fixed parts of the remote endpoint. The port is supplied per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    /// Socket.IO request path.
    pub path: String,
    /// How long teardown waits for the old link to close before aborting it.
    pub close_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            path: "/socket.io/".to_string(),
            close_grace_ms: 2_000,
        }
    }
}

impl ConnectionConfig {
    /// Override the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Endpoint for `port`.
    #[must_use]
    pub fn endpoint(&self, port: u16) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port,
            path: self.path.clone(),
        }
    }
}
