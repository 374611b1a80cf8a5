//! Error types for ladder-tun

use std::io;
use thiserror::Error;

/// Result type alias for ladder-tun operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during TUN device operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("device creation error: {0}")]
    DeviceCreation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid network prefix: {0}")]
    InvalidPrefix(String),
}

impl Error {
    /// Check if the error is a permission-related error
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::PermissionDenied)
    }
}

impl From<Error> for ladder_protocol::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => ladder_protocol::Error::Transport(e.to_string()),
            other => ladder_protocol::Error::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_detection() {
        assert!(Error::PermissionDenied("tun".into()).is_permission_denied());
        assert!(Error::Io(io::Error::from(io::ErrorKind::PermissionDenied)).is_permission_denied());
        assert!(!Error::Config("bad".into()).is_permission_denied());
    }

    #[test]
    fn test_into_protocol_error() {
        let err: ladder_protocol::Error = Error::InvalidPrefix("40".into()).into();
        assert!(matches!(err, ladder_protocol::Error::Transport(_)));
    }
}
