//! Centralized configuration for jsonsock endpoints.
//!
//! [`SocketConfig`] holds the protocol constants and defaults. [`EndpointConfig`]
//! is the per-endpoint configuration, fixed once the endpoint is built.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol constants and defaults.
pub struct SocketConfig;

impl SocketConfig {
    /// Largest payload a 2-byte length prefix can describe.
    pub const MAX_FRAME_LEN: usize = u16::MAX as usize;
    pub const DEFAULT_BACKLOG: u32 = 50;
    pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 64;
    /// How long a closing connection may spend writing frames already queued.
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_CLIENT_ADDRESS: &'static str = "127.0.0.1";
    pub const WILDCARD_ADDRESS: &'static str = "0.0.0.0";
}

/// Configuration for a client or server endpoint.
///
/// Durations are expressed in milliseconds when (de)serialized. A zero
/// `so_timeout` means no timeout, matching the socket convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host to dial (client) or interface to bind (server).
    pub address: String,
    /// Remote port (client) or local port (server). Port 0 lets the OS pick
    /// when binding.
    pub port: u16,
    /// Pending-connection queue length for the server listener.
    pub backlog: u32,
    /// Read timeout per frame. Also bounds `accept` on the server.
    #[serde(rename = "so_timeout_ms", with = "duration_ms")]
    pub so_timeout: Option<Duration>,
    /// Upper bound for dialing the server (client only).
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Option<Duration>,
    /// Run connect/listen on a dedicated background task.
    pub standalone: bool,
    /// Capacity of the per-connection outbound frame queue.
    pub send_queue_capacity: usize,
    /// Bound on flushing queued frames when the connection closes. Frames
    /// still unwritten afterwards are dropped along with the write half.
    #[serde(rename = "drain_timeout_ms", with = "duration_ms::required")]
    pub drain_timeout: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: SocketConfig::DEFAULT_CLIENT_ADDRESS.to_string(),
            port: 0,
            backlog: SocketConfig::DEFAULT_BACKLOG,
            so_timeout: None,
            connect_timeout: None,
            standalone: false,
            send_queue_capacity: SocketConfig::DEFAULT_SEND_QUEUE_CAPACITY,
            drain_timeout: SocketConfig::DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl EndpointConfig {
    /// Configuration for a client dialing `address:port`.
    pub fn client(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// Configuration for a server listening on every interface at `port`.
    pub fn server(port: u16) -> Self {
        Self {
            address: SocketConfig::WILDCARD_ADDRESS.to_string(),
            port,
            ..Self::default()
        }
    }

    /// Set the address to dial or bind.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the listener backlog.
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the read/accept timeout. `Duration::ZERO` disables it.
    pub fn with_so_timeout(mut self, timeout: Duration) -> Self {
        self.so_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Set the dial timeout. `Duration::ZERO` disables it.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Run connect/listen on a background task instead of the caller's.
    pub fn with_standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    /// Set the outbound queue capacity (at least 1).
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    /// Set how long closing waits for queued frames to be written.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// The read timeout actually applied, treating zero as disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.so_timeout.filter(|timeout| !timeout.is_zero())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.filter(|ms| *ms > 0).map(Duration::from_millis))
    }

    pub mod required {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_u64(value.as_millis() as u64)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.backlog, 50);
        assert_eq!(config.so_timeout, None);
        assert!(!config.standalone);
        assert_eq!(config.send_queue_capacity, SocketConfig::DEFAULT_SEND_QUEUE_CAPACITY);
    }

    #[test]
    fn test_server_binds_wildcard() {
        let config = EndpointConfig::server(9000);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let config = EndpointConfig::client("localhost", 1)
            .with_so_timeout(Duration::from_millis(200))
            .with_so_timeout(Duration::ZERO);
        assert_eq!(config.so_timeout, None);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = EndpointConfig::default().with_send_queue_capacity(0);
        assert_eq!(config.send_queue_capacity, 1);
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: EndpointConfig = serde_json::from_value(serde_json::json!({
            "address": "10.0.0.5",
            "port": 7070,
            "standalone": true,
            "so_timeout_ms": 250
        }))
        .unwrap();

        assert_eq!(config.address, "10.0.0.5");
        assert_eq!(config.port, 7070);
        assert!(config.standalone);
        assert_eq!(config.so_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.backlog, 50);
        assert_eq!(config.drain_timeout, SocketConfig::DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn test_serialize_uses_milliseconds() {
        let config = EndpointConfig::server(1).with_so_timeout(Duration::from_secs(2));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["so_timeout_ms"], serde_json::json!(2000));
        assert_eq!(json["connect_timeout_ms"], serde_json::Value::Null);
        assert_eq!(json["drain_timeout_ms"], serde_json::json!(1000));
    }
}
