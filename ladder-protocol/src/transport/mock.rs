//! In-memory TUN device for tests
//!
//! [`MockTunDevice`] stands in for a kernel TUN interface. Tests inject
//! packets the "OS" wants to tunnel with [`MockTunDevice::inject_recv_packet`]
//! and await what the engine delivered back with [`MockTunDevice::next_sent`].
//!
//! ```ignore
//! use ladder_protocol::transport::mock::{Ipv4PacketBuilder, MockTunDevice};
//!
//! let tun = MockTunDevice::new("tun0", 1500);
//! tun.inject_recv_packet(
//!     Ipv4PacketBuilder::new()
//!         .src_v4(10, 233, 233, 1)
//!         .dst_v4(10, 233, 233, 100)
//!         .payload(b"ping".to_vec())
//!         .build(),
//! );
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use super::{TunInfo, TunTransport};
use crate::error::Result;
use crate::Error;

/// Packets seen by a mock device, in order
#[derive(Debug, Default, Clone)]
pub struct PacketCapture {
    /// Packets the engine wrote to the device (tunnel to OS)
    pub sent: Vec<Vec<u8>>,
    /// Packets the engine read from the device (OS to tunnel)
    pub received: Vec<Vec<u8>>,
}

impl PacketCapture {
    pub fn total_sent_bytes(&self) -> usize {
        self.sent.iter().map(Vec::len).sum()
    }

    pub fn total_received_bytes(&self) -> usize {
        self.received.iter().map(Vec::len).sum()
    }
}

/// Mock TUN device
///
/// `recv` blocks until a packet is injected or the device is taken down, like
/// a real interface read would.
pub struct MockTunDevice {
    info: TunInfo,
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
    recv_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    sent_tx: mpsc::UnboundedSender<Vec<u8>>,
    sent_rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    capture: Mutex<PacketCapture>,
    up: watch::Sender<bool>,
    fail_sends: AtomicBool,
}

impl MockTunDevice {
    pub fn new(name: &str, mtu: u16) -> Self {
        let (inject_tx, recv_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (up, _) = watch::channel(true);
        Self {
            info: TunInfo {
                name: name.to_string(),
                mtu,
            },
            inject_tx,
            recv_rx: AsyncMutex::new(recv_rx),
            sent_tx,
            sent_rx: AsyncMutex::new(sent_rx),
            capture: Mutex::new(PacketCapture::default()),
            up,
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Queue a packet for the next `recv` (simulates the OS routing a packet into the tunnel)
    pub fn inject_recv_packet(&self, data: Vec<u8>) {
        // The receiver lives as long as self
        let _ = self.inject_tx.send(data);
    }

    /// Wait for the next packet written to the device
    pub async fn next_sent(&self) -> Option<Vec<u8>> {
        self.sent_rx.lock().await.recv().await
    }

    /// Like [`next_sent`](Self::next_sent) but gives up after `timeout`
    pub async fn next_sent_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(timeout, self.next_sent())
            .await
            .ok()
            .flatten()
    }

    /// Snapshot of everything read and written so far
    pub fn capture(&self) -> PacketCapture {
        self.capture.lock().unwrap().clone()
    }

    /// Take the device down; blocked and future reads and writes fail
    pub fn set_up(&self, up: bool) {
        self.up.send_replace(up);
    }

    pub fn is_up(&self) -> bool {
        *self.up.borrow()
    }

    /// Make every `send` fail while the device stays up
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunTransport for MockTunDevice {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let mut up = self.up.subscribe();
        if !*up.borrow_and_update() {
            return Err(Error::Transport("device is down".into()));
        }

        let mut rx = self.recv_rx.lock().await;
        tokio::select! {
            packet = rx.recv() => {
                let packet = packet.ok_or_else(|| Error::Transport("device closed".into()))?;
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                self.capture.lock().unwrap().received.push(packet);
                Ok(len)
            }
            _ = up.wait_for(|up| !*up) => Err(Error::Transport("device is down".into())),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if !self.is_up() {
            return Err(Error::Transport("device is down".into()));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport("write rejected".into()));
        }
        if buf.len() > self.info.mtu as usize {
            return Err(Error::Transport(format!(
                "packet size {} exceeds MTU {}",
                buf.len(),
                self.info.mtu
            )));
        }

        self.capture.lock().unwrap().sent.push(buf.to_vec());
        let _ = self.sent_tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

/// Builder for IPv4 test packets
#[derive(Debug, Clone)]
pub struct Ipv4PacketBuilder {
    src: [u8; 4],
    dst: [u8; 4],
    protocol: u8,
    ttl: u8,
    payload: Vec<u8>,
}

impl Default for Ipv4PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipv4PacketBuilder {
    pub fn new() -> Self {
        Self {
            src: [10, 233, 233, 1],
            dst: [10, 233, 233, 100],
            protocol: 17,
            ttl: 64,
            payload: Vec::new(),
        }
    }

    pub fn src_v4(mut self, a: u8, b: u8, c: u8, d: u8) -> Self {
        self.src = [a, b, c, d];
        self
    }

    pub fn dst_v4(mut self, a: u8, b: u8, c: u8, d: u8) -> Self {
        self.dst = [a, b, c, d];
        self
    }

    pub fn protocol(mut self, proto: u8) -> Self {
        self.protocol = proto;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_len = (20 + self.payload.len()) as u16;
        let mut packet = Vec::with_capacity(total_len as usize);

        packet.push(0x45); // version 4, IHL 5
        packet.push(0); // DSCP/ECN
        packet.extend_from_slice(&total_len.to_be_bytes());
        packet.extend_from_slice(&[0, 0]); // identification
        packet.extend_from_slice(&[0x40, 0]); // don't fragment
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0, 0]); // checksum placeholder
        packet.extend_from_slice(&self.src);
        packet.extend_from_slice(&self.dst);

        let checksum = header_checksum(&packet[..20]);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());

        packet.extend_from_slice(&self.payload);
        packet
    }
}

fn header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|w| u16::from_be_bytes([w[0], *w.get(1).unwrap_or(&0)]) as u32)
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::ipv4_destination;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inject_and_recv() {
        let tun = MockTunDevice::new("tun0", 1500);
        let packet = Ipv4PacketBuilder::new().payload(vec![1, 2, 3]).build();
        tun.inject_recv_packet(packet.clone());

        let mut buf = [0u8; 1500];
        let n = tun.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &packet[..]);
        assert_eq!(tun.capture().received.len(), 1);
    }

    #[tokio::test]
    async fn test_send_is_observable() {
        let tun = MockTunDevice::new("tun0", 1500);
        tun.send(&[0x45; 30]).await.unwrap();
        assert_eq!(tun.next_sent().await.unwrap(), vec![0x45; 30]);
        assert_eq!(tun.capture().total_sent_bytes(), 30);
    }

    #[tokio::test]
    async fn test_mtu_enforced() {
        let tun = MockTunDevice::new("tun0", 100);
        assert!(tun.send(&[0u8; 101]).await.is_err());
        assert!(tun.send(&[0u8; 100]).await.is_ok());
    }

    #[tokio::test]
    async fn test_set_down_wakes_blocked_recv() {
        let tun = Arc::new(MockTunDevice::new("tun0", 1500));
        let reader = {
            let tun = tun.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                tun.recv(&mut buf).await
            })
        };
        tokio::task::yield_now().await;
        tun.set_up(false);
        assert!(reader.await.unwrap().is_err());
        assert!(tun.send(&[0u8; 20]).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_sends() {
        let tun = MockTunDevice::new("tun0", 1500);
        tun.fail_sends(true);
        assert!(tun.send(&[0u8; 20]).await.is_err());
        tun.fail_sends(false);
        assert!(tun.send(&[0u8; 20]).await.is_ok());
    }

    #[test]
    fn test_builder_header() {
        let packet = Ipv4PacketBuilder::new()
            .src_v4(192, 168, 1, 2)
            .dst_v4(10, 233, 233, 101)
            .protocol(6)
            .payload(vec![0; 12])
            .build();
        assert_eq!(packet.len(), 32);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 32);
        assert_eq!(packet[9], 6);
        assert_eq!(
            ipv4_destination(&packet),
            Some(Ipv4Addr::new(10, 233, 233, 101))
        );
        // A valid header sums to zero
        assert_eq!(header_checksum(&packet[..20]), 0);
    }
}
