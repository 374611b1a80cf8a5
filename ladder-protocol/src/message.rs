//! Message framing and serialization

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Assignment, Error, Result, MAX_PAYLOAD_LEN};

/// Header length in bytes
pub const HEADER_LEN: usize = 8;

/// Message type codes, shared by client and server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks for a virtual address
    Register = 100,
    /// Server hands out a virtual address and DNS servers
    Approve = 101,
    /// IP packet from the client towards the server's TUN
    DataUp = 102,
    /// IP packet from the server's TUN towards the client
    DataDown = 103,
    /// Empty liveness ping, sent by either side
    Keepalive = 104,
}

impl MessageType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            100 => Ok(MessageType::Register),
            101 => Ok(MessageType::Approve),
            102 => Ok(MessageType::DataUp),
            103 => Ok(MessageType::DataDown),
            104 => Ok(MessageType::Keepalive),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Register => write!(f, "REGISTER"),
            MessageType::Approve => write!(f, "APPROVE"),
            MessageType::DataUp => write!(f, "DATA_UP"),
            MessageType::DataDown => write!(f, "DATA_DOWN"),
            MessageType::Keepalive => write!(f, "KEEPALIVE"),
        }
    }
}

/// Fixed-size frame header
///
/// The type is kept as a raw byte so that frames with unknown codes can still
/// be skipped without losing stream alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes
    pub length: u32,
    /// Raw message type code
    pub kind: u8,
}

impl Header {
    pub fn new(kind: MessageType, length: u32) -> Self {
        Self {
            length,
            kind: kind.as_u8(),
        }
    }

    /// Encode header to bytes
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4] = self.kind;
        // [5..8] padding, always zero
        buf
    }

    /// Decode header from bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::ProtocolViolation(format!(
                "header too short: expected {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }

        Ok(Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            kind: buf[4],
        })
    }

    /// Resolve the type code, if known
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.kind).ok()
    }
}

/// A complete protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message, rejecting payloads that do not fit in one frame
    pub fn new(kind: MessageType, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self { kind, payload })
    }

    pub fn register() -> Self {
        Self {
            kind: MessageType::Register,
            payload: Vec::new(),
        }
    }

    pub fn keepalive() -> Self {
        Self {
            kind: MessageType::Keepalive,
            payload: Vec::new(),
        }
    }

    pub fn data_up(packet: Vec<u8>) -> Result<Self> {
        Self::new(MessageType::DataUp, packet)
    }

    pub fn data_down(packet: Vec<u8>) -> Result<Self> {
        Self::new(MessageType::DataDown, packet)
    }

    /// Create an address approval carrying the assignment text
    pub fn approve(assignment: &Assignment) -> Result<Self> {
        Self::new(MessageType::Approve, assignment.to_string().into_bytes())
    }

    /// Parse the assignment out of an `Approve` message
    pub fn parse_assignment(&self) -> Result<Assignment> {
        if self.kind != MessageType::Approve {
            return Err(Error::Handshake(format!(
                "expected {} but got {}",
                MessageType::Approve,
                self.kind
            )));
        }
        let text = std::str::from_utf8(&self.payload)
            .map_err(|_| Error::Handshake("assignment is not valid UTF-8".into()))?;
        text.parse()
    }

    /// Frame header for this message
    pub fn header(&self) -> Header {
        Header::new(self.kind, self.payload.len() as u32)
    }

    /// Total encoded size (header + payload)
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode message to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.header().encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one message from a complete frame
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = Header::decode(buf)?;
        let len = header.length as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        let end = HEADER_LEN + len;
        if buf.len() < end {
            return Err(Error::ProtocolViolation(format!(
                "frame truncated: expected {} bytes, got {}",
                end,
                buf.len()
            )));
        }
        let kind = header.message_type().ok_or_else(|| {
            Error::ProtocolViolation(format!("unknown message type {}", header.kind))
        })?;
        Ok(Self {
            kind,
            payload: buf[HEADER_LEN..end].to_vec(),
        })
    }
}

/// Read the next known message from a stream
///
/// Blocks until a full header and exactly `length` payload bytes have arrived.
/// Frames with an unknown type are logged and skipped; the stream stays
/// aligned because their payload is consumed too.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        let mut hdr = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut hdr)
            .await
            .map_err(Error::from_stream)?;
        let header = Header::decode(&hdr)?;

        let len = header.length as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::ProtocolViolation(format!(
                "frame length {} exceeds maximum {}",
                len, MAX_PAYLOAD_LEN
            )));
        }

        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(Error::from_stream)?;

        match header.message_type() {
            Some(kind) => return Ok(Message { kind, payload }),
            None => {
                log::warn!(
                    "Dropping message with unknown type {} ({} bytes)",
                    header.kind,
                    len
                );
            }
        }
    }
}

/// Write one message to a stream and flush it
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer
        .write_all(&message.encode())
        .await
        .map_err(Error::from_stream)?;
    writer.flush().await.map_err(Error::from_stream)?;
    Ok(())
}
