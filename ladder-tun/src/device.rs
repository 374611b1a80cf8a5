//! TUN device wrapper
//!
//! Thin layer over `tun-rs::AsyncDevice`. There are two ways to get one:
//!
//! 1. [`TunDevice::create`] builds and configures a new interface. This needs
//!    root or `CAP_NET_ADMIN`.
//! 2. [`TunDevice::from_fd`] wraps a descriptor that a platform VPN service
//!    (Android `VpnService`, Apple NetworkExtension) already opened.
//!
//! Either way the result implements [`TunTransport`] so it can be handed to
//! the server engine or the client agent as an `Arc<dyn TunTransport>`.

use async_trait::async_trait;
use ladder_protocol::transport::{TunInfo, TunTransport};

use crate::config::TunConfig;
use crate::error::{Error, Result};

#[cfg(unix)]
use std::os::unix::io::RawFd;

/// TUN device backed by `tun-rs`
pub struct TunDevice {
    inner: tun_rs::AsyncDevice,
    info: TunInfo,
}

impl TunDevice {
    /// Create and bring up a new TUN device
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tun_rs::DeviceBuilder::new();

        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }

        if let Some(address) = config.address {
            builder = builder.ipv4(address, config.prefix_len, None::<std::net::Ipv4Addr>);
        }

        builder = builder.mtu(config.mtu);

        let device = builder.build_async().map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(e.to_string())
            } else {
                Error::DeviceCreation(e.to_string())
            }
        })?;

        let name = device
            .name()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        log::info!(
            "Created TUN device: {} ({:?}/{}, MTU: {})",
            name,
            config.address,
            config.prefix_len,
            config.mtu
        );

        Ok(Self {
            inner: device,
            info: TunInfo {
                name,
                mtu: config.mtu,
            },
        })
    }

    /// Wrap a TUN file descriptor opened by a platform VPN service
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open TUN descriptor. Ownership moves to the
    /// returned device, which closes it on drop.
    #[cfg(unix)]
    pub unsafe fn from_fd(fd: RawFd, name: impl Into<String>, mtu: u16) -> Result<Self> {
        let device = tun_rs::AsyncDevice::from_fd(fd).map_err(|e| {
            Error::DeviceCreation(format!("failed to create device from fd: {}", e))
        })?;

        let name = name.into();
        log::info!("Created TUN device from fd {}: {} (MTU: {})", fd, name, mtu);

        Ok(Self {
            inner: device,
            info: TunInfo { name, mtu },
        })
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }

    /// Read a packet from the TUN device
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.recv(buf).await.map_err(Error::Io)
    }

    /// Write a packet to the TUN device
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner.send(buf).await.map_err(Error::Io)
    }
}

#[async_trait]
impl TunTransport for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> ladder_protocol::Result<usize> {
        Ok(self.read(buf).await?)
    }

    async fn send(&self, buf: &[u8]) -> ladder_protocol::Result<usize> {
        Ok(self.write(buf).await?)
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice")
            .field("info", &self.info)
            .finish()
    }
}
