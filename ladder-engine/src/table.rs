//! Fixed-capacity session table
//!
//! One slot per virtual address. Slot `i` always owns `pool_base + i`; a slot
//! is free or holds exactly one live connection. The server keeps the table
//! behind a single `tokio::sync::Mutex` and never awaits I/O while holding
//! it: outbound messages are only enqueued on the connection's writer queue.
//!
//! Every allocation gets a fresh [`ConnectionId`], and callers address slots
//! through a [`SlotRef`] carrying that id. Once a slot is released and handed
//! to a new client, old `SlotRef`s stop matching and every operation on them
//! is a no-op.

use std::net::{Ipv4Addr, SocketAddr};

use ladder_protocol::Message;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};

/// Default seconds between keepalives sent to an idle client
pub const DEFAULT_KEEPALIVE_INTERVAL: u32 = 20;

/// Default seconds of client silence before its slot is reclaimed
pub const DEFAULT_IDLE_TIMEOUT: u32 = 60;

/// Monotonic per-connection identifier
pub type ConnectionId = u64;

/// Reference to a slot as held by one specific connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    index: usize,
    connection: ConnectionId,
}

impl SlotRef {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

/// A client connection as stored in the table
///
/// Holds the sending side of the connection's writer queue and the close
/// signal observed by its tasks.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection and the signal its tasks use to notice a release
    pub fn new(peer: SocketAddr, outbound: mpsc::Sender<Message>) -> (Self, CloseSignal) {
        let (closed, rx) = watch::channel(false);
        (
            Self {
                peer,
                outbound,
                closed,
            },
            CloseSignal(rx),
        )
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// Fires once the owning slot is released
#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<bool>);

impl CloseSignal {
    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the connection is released
    pub async fn closed(&mut self) {
        // Sender dropped also means the slot is gone
        let _ = self.0.wait_for(|closed| *closed).await;
    }
}

#[derive(Debug)]
struct Occupant {
    id: ConnectionId,
    connection: Connection,
}

#[derive(Debug)]
struct Slot {
    address: Ipv4Addr,
    occupant: Option<Occupant>,
    idle_seconds: u32,
    keepalive_countdown: u32,
}

/// Summary of one [`SessionTable::tick`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Keepalives queued this tick
    pub keepalives: usize,
    /// Sessions released for idleness: virtual address and peer
    pub reaped: Vec<(Ipv4Addr, SocketAddr)>,
}

/// The address pool and its live sessions
#[derive(Debug)]
pub struct SessionTable {
    base: u32,
    slots: Vec<Slot>,
    next_id: ConnectionId,
    keepalive_interval: u32,
    idle_timeout: u32,
}

impl SessionTable {
    /// Create a table of `pool_size` slots starting at `pool_base`
    pub fn new(pool_base: Ipv4Addr, pool_size: u32) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".into()));
        }

        let base = u32::from(pool_base);
        if base.checked_add(pool_size - 1).is_none() {
            return Err(Error::Config(format!(
                "pool of {} addresses starting at {} runs past 255.255.255.255",
                pool_size, pool_base
            )));
        }

        let slots = (0..pool_size)
            .map(|i| Slot {
                address: Ipv4Addr::from(base + i),
                occupant: None,
                idle_seconds: 0,
                keepalive_countdown: 0,
            })
            .collect();

        Ok(Self {
            base,
            slots,
            next_id: 1,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Override keepalive interval and idle timeout, both in ticks (seconds)
    pub fn with_timers(mut self, keepalive_interval: u32, idle_timeout: u32) -> Self {
        self.keepalive_interval = keepalive_interval.max(1);
        self.idle_timeout = idle_timeout;
        self
    }

    /// Claim the first free slot for `connection`
    ///
    /// Returns `None` when the pool is exhausted; the connection is dropped.
    pub fn allocate(&mut self, connection: Connection) -> Option<SlotRef> {
        let index = self.slots.iter().position(|s| s.occupant.is_none())?;

        let id = self.next_id;
        self.next_id += 1;

        let slot = &mut self.slots[index];
        slot.occupant = Some(Occupant { id, connection });
        slot.idle_seconds = 0;
        slot.keepalive_countdown = self.keepalive_interval;

        Some(SlotRef {
            index,
            connection: id,
        })
    }

    /// Close the connection held by `slot` and free it
    ///
    /// Returns `false` if the slot was already released or reassigned.
    pub fn release(&mut self, slot: SlotRef) -> bool {
        if !self.is_current(slot) {
            return false;
        }
        self.release_index(slot.index).is_some()
    }

    /// Release every occupied slot, returning how many were live
    pub fn release_all(&mut self) -> usize {
        (0..self.slots.len())
            .filter(|&i| self.release_index(i).is_some())
            .count()
    }

    fn release_index(&mut self, index: usize) -> Option<Occupant> {
        let slot = &mut self.slots[index];
        let occupant = slot.occupant.take()?;
        occupant.connection.close();
        slot.idle_seconds = 0;
        slot.keepalive_countdown = 0;
        Some(occupant)
    }

    /// Slot owning `addr`, if the address is in the pool and occupied
    pub fn find_by_destination(&self, addr: Ipv4Addr) -> Option<SlotRef> {
        let offset = u32::from(addr).checked_sub(self.base)? as usize;
        let slot = self.slots.get(offset)?;
        slot.occupant.as_ref().map(|o| SlotRef {
            index: offset,
            connection: o.id,
        })
    }

    /// Record activity from the client; `false` if the ref is stale
    pub fn touch(&mut self, slot: SlotRef) -> bool {
        if !self.is_current(slot) {
            return false;
        }
        self.slots[slot.index].idle_seconds = 0;
        true
    }

    /// Queue `message` on the slot's writer without waiting
    pub fn send(&self, slot: SlotRef, message: Message) -> Result<()> {
        let occupant = self
            .occupant(slot)
            .ok_or(Error::SessionClosed)?;

        occupant
            .connection
            .outbound
            .try_send(message)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::Connection(format!(
                    "outbound queue to {} is full",
                    occupant.connection.peer
                )),
                mpsc::error::TrySendError::Closed(_) => Error::SessionClosed,
            })
    }

    /// Advance every session by one second
    ///
    /// Counts the keepalive countdown down and queues a keepalive when it
    /// reaches zero, then ages the session and releases it once it has been
    /// silent for longer than the idle timeout.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for index in 0..self.slots.len() {
            let keepalive_interval = self.keepalive_interval;
            let slot = &mut self.slots[index];
            let Some(occupant) = slot.occupant.as_ref() else {
                continue;
            };

            slot.keepalive_countdown = slot.keepalive_countdown.saturating_sub(1);
            if slot.keepalive_countdown == 0 {
                slot.keepalive_countdown = keepalive_interval;
                match occupant.connection.outbound.try_send(Message::keepalive()) {
                    Ok(()) => report.keepalives += 1,
                    Err(e) => log::debug!(
                        "Keepalive to {} not queued: {}",
                        occupant.connection.peer,
                        e
                    ),
                }
            }

            slot.idle_seconds += 1;
            if slot.idle_seconds > self.idle_timeout {
                let address = slot.address;
                if let Some(occupant) = self.release_index(index) {
                    report.reaped.push((address, occupant.connection.peer));
                }
            }
        }

        report
    }

    pub fn is_current(&self, slot: SlotRef) -> bool {
        self.occupant(slot).is_some()
    }

    fn occupant(&self, slot: SlotRef) -> Option<&Occupant> {
        self.slots
            .get(slot.index)?
            .occupant
            .as_ref()
            .filter(|o| o.id == slot.connection)
    }

    /// Virtual address of a slot
    pub fn address_of(&self, slot: SlotRef) -> Ipv4Addr {
        Ipv4Addr::from(self.base + slot.index as u32)
    }

    /// Peer socket address of the connection holding `slot`
    pub fn peer_of(&self, slot: SlotRef) -> Option<SocketAddr> {
        self.occupant(slot).map(|o| o.connection.peer)
    }

    /// Seconds since the client behind `slot` was last heard from
    pub fn idle_seconds(&self, slot: SlotRef) -> Option<u32> {
        self.occupant(slot)
            .map(|_| self.slots[slot.index].idle_seconds)
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.occupant.is_some()).count()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
