//! Ladder Engine
//!
//! Server engine and client agent of the Ladder IP-over-TCP tunnel, shared
//! by the CLI and by platform VPN wrappers.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────── server ────────────────┐        ┌──────── client ────────┐
//!  │                                        │  TCP   │                        │
//!  │  TUN ◄──► VpnServer ◄──► SessionTable  │◄──────►│ ClientAgent ◄──► TUN   │
//!  │           (accept, ticker,  (slots,    │        │ (forward, receive,     │
//!  │            TUN reader)       pool)     │        │  watchdog)             │
//!  └────────────────────────────────────────┘        └────────────────────────┘
//!                     │                                        │
//!                     └───────────── ladder-protocol ──────────┘
//!                          framing, Assignment, TunTransport
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod stats;
pub mod table;

pub use client::{ClientAgent, Registration};
pub use config::{ClientConfig, CommonConfig, Config, ServerConfig};
pub use error::{Error, Result};
pub use server::{SharedTable, VpnServer};
pub use stats::{DirectionSnapshot, StatsSnapshot, TrafficCounters};
pub use table::{CloseSignal, Connection, ConnectionId, SessionTable, SlotRef, TickReport};
