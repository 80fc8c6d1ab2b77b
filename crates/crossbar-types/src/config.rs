//! Configuration types for a Crossbar node.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-process registry settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Human-readable identifier of this process.
    pub name: Option<String>,
    /// Channel that unresolved commands and outbound events are sent to.
    /// A registry without a router acts as the hub.
    pub router_channel: Option<String>,
    /// Upper bound for a suspended call. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
}

impl RegistryConfig {
    /// Configuration for a hub (no router channel).
    pub fn hub(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Configuration for a leaf routed through `router_channel`.
    pub fn leaf(name: impl Into<String>, router_channel: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            router_channel: Some(router_channel.into()),
            request_timeout_ms: None,
        }
    }

    /// The request timeout as a `Duration`, if one is set.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// A statically configured peer to connect to at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Channel identifier the peer is registered under.
    pub id: String,
    /// `host:port` of the peer's listener.
    pub addr: String,
}

/// Full configuration of a `crossbar run` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Registry settings, flattened into the top-level table.
    #[serde(flatten)]
    pub registry: RegistryConfig,
    /// Address to accept inbound channels on.
    pub listen_addr: Option<String>,
    /// Peers to connect to at startup.
    pub peers: Vec<PeerAddr>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            listen_addr: None,
            peers: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// The node's name, falling back to `"crossbar"`.
    pub fn node_name(&self) -> &str {
        self.registry.name.as_deref().unwrap_or("crossbar")
    }
}
