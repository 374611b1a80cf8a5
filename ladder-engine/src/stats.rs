//! Client traffic counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::time::Instant;

/// Counters for one direction of traffic
///
/// `bytes` and `packets` are cumulative for the session; `flow` counts bytes
/// since the last [`take`](Self::take).
#[derive(Debug)]
pub struct TrafficCounters {
    bytes: AtomicU64,
    packets: AtomicU64,
    flow: AtomicU64,
    reset_at: Mutex<Instant>,
}

impl Default for TrafficCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            flow: AtomicU64::new(0),
            reset_at: Mutex::new(Instant::now()),
        }
    }

    /// Record one framed message of `bytes` length (header included)
    pub fn record(&self, bytes: usize) {
        let bytes = bytes as u64;
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.flow.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Read the counters and start a new flow window
    pub fn take(&self) -> DirectionSnapshot {
        let now = Instant::now();
        let idle = {
            let mut reset_at = self.reset_at.lock().unwrap_or_else(|e| e.into_inner());
            let idle = now.saturating_duration_since(*reset_at);
            *reset_at = now;
            idle
        };

        DirectionSnapshot {
            bytes: self.bytes.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            flow: self.flow.swap(0, Ordering::Relaxed),
            idle_secs: idle.as_secs(),
        }
    }

    /// Zero everything, used when a session stops
    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Relaxed);
        self.packets.store(0, Ordering::Relaxed);
        self.flow.store(0, Ordering::Relaxed);
        *self.reset_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

/// Counters of one direction at query time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionSnapshot {
    pub bytes: u64,
    pub packets: u64,
    /// Bytes since the previous query
    pub flow: u64,
    /// Seconds since the previous query
    pub idle_secs: u64,
}

/// Both directions, rendered as
/// `in_bytes in_packets in_flow in_idle_s out_bytes out_packets out_flow out_idle_s`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub inbound: DirectionSnapshot,
    pub outbound: DirectionSnapshot,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.inbound.bytes,
            self.inbound.packets,
            self.inbound.flow,
            self.inbound.idle_secs,
            self.outbound.bytes,
            self.outbound.packets,
            self.outbound.flow,
            self.outbound.idle_secs,
        )
    }
}
