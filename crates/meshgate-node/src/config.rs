//! TOML-based configuration for gateway nodes.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use meshgate_core::types::NodeAddress;
use meshgate_interfaces::udp::UdpConfig;
use meshgate_link::LinkConfig;
use meshgate_routing::EngineConfig;
use meshgate_routing::constants as routing_defaults;

use crate::NodeError;
use crate::packet_id::PACKET_ID_SAVE_INTERVAL;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub interfaces: InterfacesSection,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        let config: Self =
            toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
        config.validate();
        Ok(config)
    }

    /// Sanity-check tunable relationships; misconfigurations warn
    /// rather than abort.
    pub fn validate(&self) {
        let p = &self.protocol;
        if p.route_ttl_ms < p.announce_interval_ms * 3 {
            warn!(
                route_ttl_ms = p.route_ttl_ms,
                announce_interval_ms = p.announce_interval_ms,
                "route_ttl_ms below three announce intervals; routes will flap"
            );
        }
    }

    /// The fixed address override, if one is configured.
    pub fn address_override(&self) -> Result<Option<NodeAddress>, NodeError> {
        self.node
            .address
            .as_deref()
            .map(|s| parse_address(s))
            .transpose()
    }

    /// Build the forwarding-engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, NodeError> {
        let subscribed_groups = self
            .node
            .subscribed_groups
            .iter()
            .map(|s| parse_address(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EngineConfig {
            max_hops: self.protocol.max_hops,
            announce_interval: self.protocol.announce_interval_ms,
            route_ttl: self.protocol.route_ttl_ms,
            prune_interval: self.protocol.prune_interval_ms,
            recent_window: self.protocol.recent_announce_window_ms,
            max_recent_announces: self.protocol.max_recent_announces,
            max_routes: self.protocol.max_routes,
            subscribed_groups,
            announce_tag: self.node.announce_tag.clone().into_bytes(),
        })
    }

    /// Build the link-sublayer configuration.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            req_timeout: self.link.req_timeout_ms,
            retry_timeout: self.link.retry_timeout_ms,
            inactivity_timeout: self.link.inactivity_timeout_ms,
            max_retries: self.link.max_retries,
            max_active: self.link.max_active,
        }
    }

    /// Build driver configurations for every `[[interfaces.udp]]` entry.
    pub fn udp_configs(&self) -> Result<Vec<UdpConfig>, NodeError> {
        self.interfaces
            .udp
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let bind: SocketAddr = entry
                    .bind
                    .parse()
                    .map_err(|e| NodeError::Config(format!("udp bind address: {e}")))?;
                let target: SocketAddr = entry
                    .target
                    .parse()
                    .map_err(|e| NodeError::Config(format!("udp target address: {e}")))?;
                let name = entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("udp{i}[{bind}]"));
                Ok(if entry.broadcast {
                    UdpConfig::broadcast(name, bind, target)
                } else {
                    UdpConfig::unicast(name, bind, target)
                })
            })
            .collect()
    }
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
pub struct NodeSection {
    /// Fixed 8-byte address as 16 hex chars. Normally absent: the
    /// address is generated once and persisted.
    pub address: Option<String>,
    /// Custom storage directory path. Defaults to `~/.meshgate/storage`.
    pub storage_path: Option<String>,
    /// Whether to enable persistent storage. Default: true.
    #[serde(default = "default_enable_storage")]
    pub enable_storage: bool,
    /// 8-byte group prefixes (16 hex chars each) delivered locally.
    #[serde(default)]
    pub subscribed_groups: Vec<String>,
    /// Short tag appended to self-announce payloads.
    #[serde(default)]
    pub announce_tag: String,
    /// Flush the packet id counter every N allocations. Default: 100.
    #[serde(default = "default_save_interval")]
    pub packet_id_save_interval: u16,
}

fn default_enable_storage() -> bool {
    true
}

fn default_save_interval() -> u16 {
    PACKET_ID_SAVE_INTERVAL
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            address: None,
            storage_path: None,
            enable_storage: default_enable_storage(),
            subscribed_groups: Vec::new(),
            announce_tag: String::new(),
            packet_id_save_interval: default_save_interval(),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The `[protocol]` section: forwarding-engine tunables.
#[derive(Debug, Deserialize)]
pub struct ProtocolSection {
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,
    #[serde(default = "default_route_ttl")]
    pub route_ttl_ms: u64,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_ms: u64,
    #[serde(default = "default_recent_window")]
    pub recent_announce_window_ms: u64,
    #[serde(default = "default_max_recent")]
    pub max_recent_announces: usize,
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,
}

fn default_max_hops() -> u8 {
    meshgate_core::constants::MAX_HOPS
}

fn default_announce_interval() -> u64 {
    routing_defaults::ANNOUNCE_INTERVAL_MS
}

fn default_route_ttl() -> u64 {
    routing_defaults::ROUTE_TTL_MS
}

fn default_prune_interval() -> u64 {
    routing_defaults::PRUNE_INTERVAL_MS
}

fn default_recent_window() -> u64 {
    routing_defaults::RECENT_ANNOUNCE_WINDOW_MS
}

fn default_max_recent() -> usize {
    routing_defaults::MAX_RECENT_ANNOUNCES
}

fn default_max_routes() -> usize {
    routing_defaults::MAX_ROUTES
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            announce_interval_ms: default_announce_interval(),
            route_ttl_ms: default_route_ttl(),
            prune_interval_ms: default_prune_interval(),
            recent_announce_window_ms: default_recent_window(),
            max_recent_announces: default_max_recent(),
            max_routes: default_max_routes(),
        }
    }
}

/// The `[link]` section: reliability tunables.
#[derive(Debug, Deserialize)]
pub struct LinkSection {
    #[serde(default = "default_req_timeout")]
    pub req_timeout_ms: u64,
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

fn default_req_timeout() -> u64 {
    meshgate_link::constants::LINK_REQ_TIMEOUT_MS
}

fn default_retry_timeout() -> u64 {
    meshgate_link::constants::LINK_RETRY_TIMEOUT_MS
}

fn default_inactivity_timeout() -> u64 {
    meshgate_link::constants::LINK_INACTIVITY_TIMEOUT_MS
}

fn default_max_retries() -> u8 {
    meshgate_link::constants::LINK_MAX_RETRIES
}

fn default_max_active() -> usize {
    meshgate_link::constants::LINK_MAX_ACTIVE
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            req_timeout_ms: default_req_timeout(),
            retry_timeout_ms: default_retry_timeout(),
            inactivity_timeout_ms: default_inactivity_timeout(),
            max_retries: default_max_retries(),
            max_active: default_max_active(),
        }
    }
}

/// The `[interfaces]` section containing arrays of driver configs.
#[derive(Debug, Default, Deserialize)]
pub struct InterfacesSection {
    #[serde(default)]
    pub udp: Vec<UdpEntry>,
}

/// An `[[interfaces.udp]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UdpEntry {
    pub name: Option<String>,
    /// Local bind address, e.g. "0.0.0.0:4242".
    pub bind: String,
    /// Where unrouted traffic goes: the subnet broadcast address for a
    /// mesh segment, or the peer for a point-to-point tunnel.
    pub target: String,
    /// Enable `SO_BROADCAST`. Default: false.
    #[serde(default)]
    pub broadcast: bool,
}

/// Parse a 16-hex-char node address or group prefix.
fn parse_address(s: &str) -> Result<NodeAddress, NodeError> {
    let s = s.trim();
    if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NodeError::Config(format!(
            "expected 16 hex chars for address, got {s:?}"
        )));
    }
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|e| NodeError::Config(format!("bad hex in address {s:?}: {e}")))?;
    }
    Ok(NodeAddress::new(bytes))
}
