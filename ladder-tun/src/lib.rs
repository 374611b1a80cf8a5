//! TUN device bridge for the Ladder tunnel
//!
//! Wraps the `tun-rs` async device and exposes it through
//! [`ladder_protocol::transport::TunTransport`], which is all the server
//! engine and the client agent need from the operating system.
//!
//! # Platform Requirements
//!
//! ## Linux
//! - Root privileges or `CAP_NET_ADMIN` capability
//! - TUN kernel module loaded (`modprobe tun`)
//!
//! ## Android / NetworkExtension
//! - The platform VPN service owns the interface and hands over a file
//!   descriptor; wrap it with [`TunDevice::from_fd`].
//!
//! # Example
//!
//! ```ignore
//! use ladder_tun::{TunConfig, TunDevice};
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TunConfig::builder()
//!         .name("ladder0")
//!         .ipv4(Ipv4Addr::new(10, 233, 233, 1), 24)
//!         .mtu(1500)
//!         .build()?;
//!
//!     let device = TunDevice::create(config).await?;
//!     let mut buf = vec![0u8; 4096];
//!     let n = device.read(&mut buf).await?;
//!     println!("Received {} bytes", n);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;

#[cfg(target_os = "linux")]
pub mod linux;

pub use config::{TunConfig, TunConfigBuilder};
pub use device::TunDevice;
pub use error::{Error, Result};

/// Default MTU for TUN devices
pub const DEFAULT_MTU: u16 = 1500;
