//! TUN interface abstraction
//!
//! Both tunnel roles talk to the operating system through [`TunTransport`]:
//! the server reads packets addressed to clients from it and writes packets
//! coming up from clients into it, the client agent does the reverse. The
//! trait is async and object safe so engines hold an `Arc<dyn TunTransport>`
//! and tests swap in [`mock::MockTunDevice`].
//!
//! # Example
//!
//! ```ignore
//! use ladder_protocol::transport::TunTransport;
//!
//! async fn pump(tun: &dyn TunTransport) -> ladder_protocol::Result<()> {
//!     let mut buf = vec![0u8; ladder_protocol::MAX_MESSAGE_LEN];
//!     let n = tun.recv(&mut buf).await?;
//!     tun.send(&buf[..n]).await?;
//!     Ok(())
//! }
//! ```

pub mod mock;

use async_trait::async_trait;

use crate::error::Result;

/// Information about a TUN interface
#[derive(Debug, Clone)]
pub struct TunInfo {
    /// Interface name (e.g., "tun0", "utun3")
    pub name: String,
    /// Maximum transmission unit size
    pub mtu: u16,
}

/// Async transport trait for TUN interface operations
///
/// The TUN interface operates at layer 3, so every buffer is one raw IP
/// datagram without link-layer framing.
#[async_trait]
pub trait TunTransport: Send + Sync {
    /// Receive one IP packet the OS wants to send through the tunnel
    ///
    /// Blocks until a packet is available. Returns the number of bytes
    /// written into `buf`.
    ///
    /// # Cancel Safety
    ///
    /// Implementations must be cancel-safe; engines race this against
    /// shutdown signals.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Deliver one IP packet to the OS network stack
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Get information about the TUN interface
    fn info(&self) -> &TunInfo;

    fn mtu(&self) -> u16 {
        self.info().mtu
    }

    fn name(&self) -> &str {
        &self.info().name
    }
}
