//! Error types for the SOCKS5 relay.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::proxy::consts;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a SOCKS5 client.
#[derive(Error, Debug)]
pub enum Error {
    /// Stream ended before the greeting or request was fully read
    #[error("incomplete handshake: stream ended early")]
    IncompleteHandshake,

    /// Protocol version byte was not 5
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// Command other than CONNECT
    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    /// Address type tag other than IPv4, domain name or IPv6
    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    /// Connecting to the requested destination failed
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Handshake did not finish in time
    #[error("handshake timeout after {0:?}")]
    Timeout(Duration),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::IncompleteHandshake
        } else {
            Error::Network(err)
        }
    }
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if the peer hung up in the middle of the handshake
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::IncompleteHandshake)
    }

    /// SOCKS5 reply code describing this failure.
    pub fn reply_code(&self) -> u8 {
        match self {
            Error::UnsupportedCommand(_) => consts::SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            Error::UnsupportedAddressType(_) => consts::SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            Error::Connect { source, .. } => match source.kind() {
                io::ErrorKind::ConnectionRefused => consts::SOCKS5_REPLY_CONNECTION_REFUSED,
                io::ErrorKind::HostUnreachable => consts::SOCKS5_REPLY_HOST_UNREACHABLE,
                io::ErrorKind::NetworkUnreachable => consts::SOCKS5_REPLY_NETWORK_UNREACHABLE,
                _ => consts::SOCKS5_REPLY_GENERAL_FAILURE,
            },
            Error::Timeout(_) => consts::SOCKS5_REPLY_TTL_EXPIRED,
            _ => consts::SOCKS5_REPLY_GENERAL_FAILURE,
        }
    }
}
