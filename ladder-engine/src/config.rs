//! Configuration types for the tunnel engine

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use ladder_protocol::{DEFAULT_PORT, MAX_PAYLOAD_LEN};

/// Location of the system resolver configuration
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Most DNS servers pushed to a client
pub const MAX_DNS_SERVERS: usize = 3;

/// Main configuration structure
///
/// The configuration file uses TOML format and contains sections for both
/// server and client modes. Only the relevant section is used based on the
/// mode the application is running in.
///
/// # Example Configuration
///
/// ```toml
/// [common]
/// mtu = 1500
/// log_level = "info"
///
/// [server]
/// listen = "::"
/// port = 10002
/// pool_start = "10.233.233.100"
/// pool_size = 100
/// tunnel_address = "10.233.233.1/24"
///
/// [client]
/// server = "vpn.example.com"
/// port = 10002
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Common settings shared between server and client
    #[serde(default)]
    pub common: CommonConfig,

    /// Server-specific configuration
    pub server: Option<ServerConfig>,

    /// Client-specific configuration
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;

        if let Some(ref server) = self.server {
            server.validate()?;
        }

        if let Some(ref client) = self.client {
            client.validate()?;
        }

        Ok(())
    }

    /// Get the server configuration, or error if not present
    pub fn server_config(&self) -> Result<&ServerConfig> {
        self.server
            .as_ref()
            .ok_or_else(|| Error::Config("server configuration is required".into()))
    }

    /// Get the client configuration, or error if not present
    pub fn client_config(&self) -> Result<&ClientConfig> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Config("client configuration is required".into()))
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Ladder tunnel configuration

# Shared settings used by both server and client
[common]
# MTU for the tunnel interface (576..=4088, default: 1500)
mtu = 1500

# Log level: "error", "warn", "info", "debug", "trace"
# RUST_LOG overrides this when set.
log_level = "info"

# TUN device name (optional, auto-assigned if not set)
# tun_device = "ladder0"

# Server configuration (used when running as server)
[server]
# Address to listen on; "::" accepts IPv4 and IPv6 clients
listen = "::"

# TCP port (default: 10002)
port = 10002

# First virtual address handed to clients
pool_start = "10.233.233.100"

# Number of virtual addresses, one per concurrent client (default: 100)
pool_size = 100

# Address of the server's own TUN interface
tunnel_address = "10.233.233.1/24"

# DNS servers pushed to clients in the approval message.
# If empty, the first 3 nameservers of /etc/resolv.conf are used.
# dns_servers = ["8.8.8.8", "1.1.1.1"]

# Seconds between server keepalives to each client (default: 20)
keepalive_interval = 20

# Seconds without any message before a client is dropped (default: 60)
idle_timeout = 60

# Messages buffered per client before new ones are dropped (default: 256)
client_queue = 256

# Client configuration (used when running as client)
[client]
# Server hostname or IP address (required)
server = "vpn.example.com"

# Server TCP port (default: 10002)
port = 10002

# Seconds between client keepalives (default: 21)
keepalive_interval = 21

# Seconds without any server message before the session is dead (default: 60)
dead_timeout = 60

# Seconds allowed for the TCP connect (default: 10)
connect_timeout = 10

# Seconds between traffic statistics log lines, 0 disables (default: 0)
stats_interval = 0
"#
        .to_string()
    }
}

/// Common configuration shared between server and client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// MTU for the tunnel interface
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// TUN device name (optional)
    #[serde(default)]
    pub tun_device: Option<String>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            log_level: default_log_level(),
            tun_device: None,
        }
    }
}

impl CommonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 576 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 576)",
                self.mtu
            )));
        }
        // A full packet must fit in one frame
        if self.mtu as usize > MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "MTU {} is too large (maximum {})",
                self.mtu, MAX_PAYLOAD_LEN
            )));
        }
        Ok(())
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to listen on
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// First address of the virtual address pool
    #[serde(default = "default_pool_start")]
    pub pool_start: Ipv4Addr,

    /// Number of addresses in the pool, fixed for the process lifetime
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Server TUN interface address in CIDR notation
    #[serde(default = "default_tunnel_address")]
    pub tunnel_address: String,

    /// DNS servers announced to clients (empty: read from resolv.conf)
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,

    /// Seconds between keepalives sent to each client
    #[serde(default = "default_server_keepalive")]
    pub keepalive_interval: u32,

    /// Seconds of client silence before its slot is released
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u32,

    /// Outbound message queue depth per client
    #[serde(default = "default_client_queue")]
    pub client_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            pool_start: default_pool_start(),
            pool_size: default_pool_size(),
            tunnel_address: default_tunnel_address(),
            dns_servers: Vec::new(),
            keepalive_interval: default_server_keepalive(),
            idle_timeout: default_idle_timeout(),
            client_queue: default_client_queue(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".into()));
        }

        let start: u32 = self.pool_start.into();
        if start.checked_add(self.pool_size - 1).is_none() {
            return Err(Error::Config(format!(
                "pool of {} addresses starting at {} runs past 255.255.255.255",
                self.pool_size, self.pool_start
            )));
        }

        if self.keepalive_interval == 0 {
            return Err(Error::Config("keepalive_interval must be positive".into()));
        }

        if self.idle_timeout <= self.keepalive_interval {
            return Err(Error::Config(format!(
                "idle_timeout ({}) must be greater than keepalive_interval ({})",
                self.idle_timeout, self.keepalive_interval
            )));
        }

        if self.client_queue == 0 {
            return Err(Error::Config("client_queue must be at least 1".into()));
        }

        let net = self.tunnel_net()?;
        if self.pool_contains(net.addr()) {
            return Err(Error::Config(format!(
                "tunnel_address {} overlaps the client pool",
                net.addr()
            )));
        }

        Ok(())
    }

    /// Get the tunnel interface address as an Ipv4Net
    pub fn tunnel_net(&self) -> Result<ipnet::Ipv4Net> {
        self.tunnel_address
            .parse()
            .map_err(|e| Error::Config(format!("invalid tunnel_address: {}", e)))
    }

    /// Socket address the listener binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }

    /// Last address of the pool
    pub fn pool_end(&self) -> Ipv4Addr {
        let start: u32 = self.pool_start.into();
        Ipv4Addr::from(start.saturating_add(self.pool_size.saturating_sub(1)))
    }

    fn pool_contains(&self, addr: Ipv4Addr) -> bool {
        addr >= self.pool_start && addr <= self.pool_end()
    }

    /// DNS servers to announce, falling back to the system resolver
    pub fn resolve_dns_servers(&self) -> Vec<IpAddr> {
        if !self.dns_servers.is_empty() {
            return self.dns_servers.clone();
        }

        match std::fs::read_to_string(RESOLV_CONF) {
            Ok(content) => {
                let servers = parse_resolv_conf(&content);
                log::info!("Using DNS servers from {}: {:?}", RESOLV_CONF, servers);
                servers
            }
            Err(e) => {
                log::warn!("Cannot read {}: {}, announcing no DNS servers", RESOLV_CONF, e);
                Vec::new()
            }
        }
    }
}

/// Extract up to [`MAX_DNS_SERVERS`] `nameserver` entries
pub fn parse_resolv_conf(content: &str) -> Vec<IpAddr> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("nameserver") => fields.next(),
                _ => None,
            }
        })
        // Link-local IPv6 entries carry a zone suffix
        .filter_map(|value| value.split('%').next()?.parse().ok())
        .take(MAX_DNS_SERVERS)
        .collect()
}

/// Client-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server hostname or IP address
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between keepalives sent to the server
    #[serde(default = "default_client_keepalive")]
    pub keepalive_interval: u32,

    /// Seconds without any server message before the session is torn down
    #[serde(default = "default_dead_timeout")]
    pub dead_timeout: u32,

    /// Seconds allowed for establishing the TCP connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds between statistics log lines (0 disables)
    #[serde(default)]
    pub stats_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_port(),
            keepalive_interval: default_client_keepalive(),
            dead_timeout: default_dead_timeout(),
            connect_timeout: default_connect_timeout(),
            stats_interval: 0,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("client server is required".into()));
        }

        if self.keepalive_interval == 0 {
            return Err(Error::Config("keepalive_interval must be positive".into()));
        }

        if self.dead_timeout <= self.keepalive_interval {
            return Err(Error::Config(format!(
                "dead_timeout ({}) must be greater than keepalive_interval ({})",
                self.dead_timeout, self.keepalive_interval
            )));
        }

        if self.connect_timeout == 0 {
            return Err(Error::Config("connect_timeout must be positive".into()));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Interval for periodic statistics, `None` when disabled
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval > 0).then(|| Duration::from_secs(self.stats_interval))
    }
}

fn default_mtu() -> u16 {
    1500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> IpAddr {
    IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 0])
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_pool_start() -> Ipv4Addr {
    Ipv4Addr::new(10, 233, 233, 100)
}

fn default_pool_size() -> u32 {
    100
}

fn default_tunnel_address() -> String {
    "10.233.233.1/24".to_string()
}

fn default_server_keepalive() -> u32 {
    20
}

fn default_idle_timeout() -> u32 {
    60
}

fn default_client_queue() -> usize {
    256
}

fn default_client_keepalive() -> u32 {
    21
}

fn default_dead_timeout() -> u32 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}
