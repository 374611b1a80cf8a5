//! Error types for the tunnel engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the server or the client agent
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or TUN transport error
    #[error("protocol error: {0}")]
    Protocol(#[from] ladder_protocol::Error),

    /// Every session slot is occupied
    #[error("address pool exhausted")]
    PoolExhausted,

    #[error("connection error: {0}")]
    Connection(String),

    /// Registration did not end in an approved assignment
    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session is already running")]
    AlreadyRunning,

    /// `start` called before a successful registration
    #[error("not registered")]
    NotRegistered,

    #[error("session closed")]
    SessionClosed,
}

impl Error {
    /// Check if a new session attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Connection(_) | Error::PoolExhausted => true,
            Error::SessionClosed => true,
            Error::Protocol(e) => e.is_connection_closed(),
            _ => false,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(Error::Timeout("connect".into()).is_recoverable());
        assert!(Error::Protocol(ladder_protocol::Error::ConnectionClosed).is_recoverable());
        assert!(!Error::Handshake("bad".into()).is_recoverable());
        assert!(Error::Config("x".into()).is_config_error());
    }
}
