//! Error types for the socket engine

use core::fmt;
use std::io;

/// Result type for engine operations
pub type NetResult<T> = Result<T, NetError>;

/// Errors that can occur in engine operations
#[derive(Debug)]
pub enum NetError {
    /// Hostname could not be resolved to an IPv4 address
    Resolve(String),

    /// Connect did not complete within the allowed time
    ConnectTimeout,

    /// Outbound ring buffer has insufficient free space
    BufferFull,

    /// Queue was aborted while a caller was blocked on it
    QueueAborted,

    /// Socket is not in a state that allows the operation
    NotConnected,

    /// Engine is already shut down
    ShutDown,

    /// Underlying OS error (socket create, bind, listen, register, ...)
    Io(io::Error),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Resolve(host) => write!(f, "could not resolve address: {}", host),
            NetError::ConnectTimeout => write!(f, "connect timed out"),
            NetError::BufferFull => write!(f, "outbound buffer full"),
            NetError::QueueAborted => write!(f, "queue aborted"),
            NetError::NotConnected => write!(f, "socket not connected"),
            NetError::ShutDown => write!(f, "engine shut down"),
            NetError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        NetError::Io(e)
    }
}

impl NetError {
    /// OS error code of the underlying error, if there is one
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            NetError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
