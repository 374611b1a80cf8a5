//! TUN device configuration

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::DEFAULT_MTU;

/// Configuration for creating a TUN device
#[derive(Debug, Clone)]
pub struct TunConfig {
    /// Interface name (optional, auto-generated if not specified)
    pub name: Option<String>,
    /// Interface address
    pub address: Option<Ipv4Addr>,
    /// Network prefix length (e.g., 24 for /24, 32 for a client host route)
    pub prefix_len: u8,
    /// Maximum transmission unit
    pub mtu: u16,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: None,
            address: None,
            prefix_len: 32,
            mtu: DEFAULT_MTU,
        }
    }
}

impl TunConfig {
    pub fn builder() -> TunConfigBuilder {
        TunConfigBuilder::new()
    }

    /// Interface network, if an address is configured
    pub fn network(&self) -> Option<Ipv4Net> {
        let address = self.address?;
        Ipv4Net::new(address, self.prefix_len).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_none() {
            return Err(Error::Config("an IPv4 address must be configured".into()));
        }

        if self.prefix_len > 32 {
            return Err(Error::InvalidPrefix(format!(
                "IPv4 prefix length {} is invalid (max 32)",
                self.prefix_len
            )));
        }

        if self.mtu < 68 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 68)",
                self.mtu
            )));
        }

        if let Some(name) = &self.name {
            if name.is_empty() || name.len() >= 16 {
                return Err(Error::Config(format!("invalid interface name '{}'", name)));
            }
        }

        Ok(())
    }
}

/// Builder for TunConfig
#[derive(Debug, Default)]
pub struct TunConfigBuilder {
    config: TunConfig,
}

impl TunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set the IPv4 address and prefix length
    pub fn ipv4(mut self, address: impl Into<Ipv4Addr>, prefix_len: u8) -> Self {
        self.config.address = Some(address.into());
        self.config.prefix_len = prefix_len;
        self
    }

    /// Set the address from interface notation, e.g. `10.233.233.1/24`
    pub fn ipv4_net(self, net: Ipv4Net) -> Self {
        self.ipv4(net.addr(), net.prefix_len())
    }

    /// Parse the address from a string, with or without a prefix
    pub fn ipv4_str(self, address: &str) -> Result<Self> {
        if address.contains('/') {
            let net: Ipv4Net = address
                .parse()
                .map_err(|_| Error::InvalidAddress(address.to_string()))?;
            return Ok(self.ipv4_net(net));
        }
        let addr: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        Ok(self.ipv4(addr, 32))
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
