//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: ACTON_SOCKET_, nesting separator: `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/acton-socket/{service_name}/config.toml
//! 4. System directory: /etc/acton-socket/{service_name}/config.toml
//! 5. Default values
//!
//! A loaded [`Config`] is immutable. Components receive it as `Arc<Config>`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ack::AckMode;
use crate::error::{Error, Result};
use crate::protocol::Transport;

const ENV_PREFIX: &str = "ACTON_SOCKET_";
const XDG_PREFIX: &str = "acton-socket";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Session, heartbeat and transport settings
    #[serde(default)]
    pub socket: SocketConfig,

    /// Cluster configuration (optional, single node when absent)
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Session and transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Path prefix the transports are mounted under
    #[serde(default = "default_context")]
    pub context: String,

    /// Enabled transports, in preference order
    #[serde(default = "default_transports")]
    pub transports: Vec<Transport>,

    /// Interval between client pings in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Grace period after a missed ping in milliseconds (0 disables heartbeats)
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Time a websocket has to complete an upgrade in milliseconds
    #[serde(default = "default_upgrade_timeout")]
    pub upgrade_timeout_ms: u64,

    /// Time a handshaken session has to connect in milliseconds
    #[serde(default = "default_first_data_timeout")]
    pub first_data_timeout_ms: u64,

    /// Maximum websocket frame payload in bytes
    #[serde(default = "default_max_frame_payload_length")]
    pub max_frame_payload_length: usize,

    /// When acknowledgements for inbound events are sent
    #[serde(default)]
    pub ack_mode: AckMode,
}

impl SocketConfig {
    /// Get the ping interval as a Duration
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Get the ping timeout as a Duration
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Time without client activity after which a session is dropped
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.ping_timeout() + self.ping_interval()
    }

    /// Get the upgrade timeout as a Duration
    #[must_use]
    pub fn upgrade_timeout(&self) -> Duration {
        Duration::from_millis(self.upgrade_timeout_ms)
    }

    /// Get the first data timeout as a Duration
    #[must_use]
    pub fn first_data_timeout(&self) -> Duration {
        Duration::from_millis(self.first_data_timeout_ms)
    }

    /// Heartbeats are disabled with a zero ping timeout
    #[must_use]
    pub fn heartbeats_enabled(&self) -> bool {
        self.ping_timeout_ms > 0
    }

    /// Whether a transport is enabled
    #[must_use]
    pub fn is_transport_enabled(&self, transport: Transport) -> bool {
        self.transports.contains(&transport)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            transports: default_transports(),
            ping_interval_ms: default_ping_interval(),
            ping_timeout_ms: default_ping_timeout(),
            upgrade_timeout_ms: default_upgrade_timeout(),
            first_data_timeout_ms: default_first_data_timeout(),
            max_frame_payload_length: default_max_frame_payload_length(),
            ack_mode: AckMode::default(),
        }
    }
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Identifier of this process within the cluster, must be unique per node
    pub node_id: u64,

    /// Prefix for pub/sub subjects and channels
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Which pub/sub transport carries cluster events
    #[serde(default)]
    pub backend: ClusterBackend,

    /// NATS configuration (required for the NATS backend)
    #[serde(default)]
    pub nats: Option<NatsConfig>,

    /// Redis configuration (required for the Redis backend)
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Pub/sub transport selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBackend {
    /// Nodes living in the same process share an in-memory broker
    #[default]
    InProcess,
    /// NATS core pub/sub
    Nats,
    /// Redis PUBLISH/SUBSCRIBE
    Redis,
}

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,

    /// Connection name
    #[serde(default)]
    pub name: Option<String>,

    /// Max reconnection attempts
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,

    /// Maximum retry attempts for initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Maximum retry attempts for establishing the connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_context() -> String {
    "/socket.io".to_string()
}

fn default_transports() -> Vec<Transport> {
    vec![Transport::WebSocket, Transport::Polling]
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    60_000
}

fn default_upgrade_timeout() -> u64 {
    10_000
}

fn default_first_data_timeout() -> u64 {
    5_000
}

fn default_max_frame_payload_length() -> usize {
    64 * 1024
}

fn default_channel_prefix() -> String {
    "acton-socket".to_string()
}

fn default_max_reconnects() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/acton-socket/{service_name}/config.toml
    /// 3. System directory: /etc/acton-socket/{service_name}/config.toml
    ///
    /// Environment variables (ACTON_SOCKET_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "acton-socket".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.socket.transports.is_empty() {
            return Err(Error::Internal(
                "socket.transports must list at least one transport".to_string(),
            ));
        }

        if let Some(cluster) = &self.cluster {
            match cluster.backend {
                ClusterBackend::Nats if cluster.nats.is_none() => {
                    return Err(Error::Internal(
                        "cluster.backend = \"nats\" requires a [cluster.nats] section".to_string(),
                    ));
                }
                ClusterBackend::Redis if cluster.redis.is_none() => {
                    return Err(Error::Internal(
                        "cluster.backend = \"redis\" requires a [cluster.redis] section".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Identifier of this node, 0 when running without a cluster
    #[must_use]
    pub fn node_id(&self) -> u64 {
        self.cluster.as_ref().map_or(0, |c| c.node_id)
    }

    /// Find all possible config file paths for a service
    ///
    /// Returns paths in priority order (highest first)
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(XDG_PREFIX);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(XDG_PREFIX)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "acton-socket".to_string(),
                log_level: default_log_level(),
            },
            socket: SocketConfig::default(),
            cluster: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.socket.ping_interval_ms, 25_000);
        assert_eq!(config.socket.ping_timeout_ms, 60_000);
        assert_eq!(config.socket.ack_mode, AckMode::AutoSuccessOnly);
        assert!(config.cluster.is_none());
        assert_eq!(config.node_id(), 0);
    }

    #[test]
    fn test_duration_helpers() {
        let socket = SocketConfig::default();
        assert_eq!(socket.ping_interval(), Duration::from_secs(25));
        assert_eq!(socket.heartbeat_timeout(), Duration::from_secs(85));
        assert_eq!(socket.upgrade_timeout(), Duration::from_secs(10));
        assert!(socket.heartbeats_enabled());
    }

    #[test]
    fn test_zero_ping_timeout_disables_heartbeats() {
        let socket = SocketConfig {
            ping_timeout_ms: 0,
            ..SocketConfig::default()
        };
        assert!(!socket.heartbeats_enabled());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "chat"
log_level = "debug"

[socket]
ping_interval_ms = 1000
transports = ["websocket"]
ack_mode = "manual"

[cluster]
node_id = 7
backend = "in_process"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.service.name, "chat");
        assert_eq!(config.socket.ping_interval_ms, 1000);
        assert_eq!(config.socket.ping_timeout_ms, 60_000);
        assert_eq!(config.socket.transports, vec![Transport::WebSocket]);
        assert!(!config.socket.is_transport_enabled(Transport::Polling));
        assert_eq!(config.socket.ack_mode, AckMode::Manual);
        assert_eq!(config.node_id(), 7);
    }

    #[test]
    fn test_empty_transports_rejected() {
        let mut config = Config::default();
        config.socket.transports.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nats_backend_requires_section() {
        let mut config = Config::default();
        config.cluster = Some(ClusterConfig {
            node_id: 1,
            channel_prefix: default_channel_prefix(),
            backend: ClusterBackend::Nats,
            nats: None,
            redis: None,
        });
        assert!(config.validate().is_err());
    }
}
