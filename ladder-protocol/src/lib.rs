//! Ladder Protocol Implementation
//!
//! A length-prefixed message protocol carrying raw IP packets over a single
//! TCP stream between a tunnel client and the tunnel server.
//!
//! # Wire Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Byte 0 | Byte 1 | Byte 2 | Byte 3 | Byte 4 | Byte 5 | Byte 6 | Byte 7 |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! |      Length (uint32, big-endian)  |  Type  |        Padding           |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | Payload (Length bytes) ...
//! ```
//!
//! # Example
//!
//! ```rust
//! use ladder_protocol::{Message, MessageType};
//!
//! let msg = Message::data_up(vec![0x45, 0x00, 0x00, 0x14]).unwrap();
//! let bytes = msg.encode();
//! assert_eq!(bytes.len(), ladder_protocol::HEADER_LEN + 4);
//! assert_eq!(msg.kind, MessageType::DataUp);
//! ```

mod assignment;
mod error;
pub mod ip;
mod message;
pub mod transport;

pub use assignment::Assignment;
pub use error::{Error, Result};
pub use message::{read_message, write_message, Header, Message, MessageType, HEADER_LEN};

/// Largest frame (header + payload) either side will produce or accept
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Largest payload that fits in a single frame
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN - HEADER_LEN;

/// Default TCP port of the tunnel server
pub const DEFAULT_PORT: u16 = 10002;
