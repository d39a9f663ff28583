//! Client configuration.
//!
//! `ConnectionConfig` holds fixed constants; `ClientConfig` is the per-instance,
//! runtime-tunable configuration passed to [`PocaClient::with_config`](crate::PocaClient::with_config).

use crate::{PocaError, Result};
use std::time::Duration;
use url::Url;

/// Connection-related constants.
pub struct ConnectionConfig;

impl ConnectionConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_SCHEME: &'static str = "ws";
    pub const ACCEPTED_SCHEMES: [&'static str; 2] = ["ws", "wss"];
}

/// Runtime configuration for one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on the transport open handshake.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a Get response. `None` waits until the
    /// response arrives or the connection drops.
    pub request_timeout: Option<Duration>,
    /// Defer lookups issued while Down and flush them on the next connect.
    /// When false, such lookups fail with `NotConnected`.
    pub buffer_while_down: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: ConnectionConfig::CONNECT_TIMEOUT,
            request_timeout: None,
            buffer_while_down: true,
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_buffering(mut self, enabled: bool) -> Self {
        self.buffer_while_down = enabled;
        self
    }
}

/// Parse a `host:port` address, optionally schemed, into a WebSocket URL.
///
/// Addresses without a scheme get `ws://`.
pub fn parse_address(addr: &str) -> Result<Url> {
    let addr = addr.trim();
    let candidate = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("{}://{}", ConnectionConfig::DEFAULT_SCHEME, addr)
    };

    let url = Url::parse(&candidate).map_err(|e| PocaError::InvalidAddress {
        addr: addr.to_string(),
        message: e.to_string(),
    })?;

    if !ConnectionConfig::ACCEPTED_SCHEMES.contains(&url.scheme()) {
        return Err(PocaError::InvalidAddress {
            addr: addr.to_string(),
            message: format!("URL must use ws:// or wss:// scheme, got: {}", url.scheme()),
        });
    }

    if url.host_str().is_none() {
        return Err(PocaError::InvalidAddress {
            addr: addr.to_string(),
            message: "missing host".to_string(),
        });
    }

    Ok(url)
}
