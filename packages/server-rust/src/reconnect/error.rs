//! Errors on the reconnection control channel.

use std::io;

use crate::service::{ResolveError, ServiceError};

/// Why a reconnection attempt or the control channel failed.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error("control channel i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("control channel ended inside a frame: expected {expected} bytes, got {available}")]
    Truncated { expected: usize, available: usize },
    #[error("host name is not valid UTF-8")]
    InvalidHostName,
    #[error("port {port} is out of range")]
    InvalidPort { port: i32 },
    #[error("control channel ended after {received} of 16 authentication key bytes")]
    Auth { received: usize },
    #[error("failed to install communication services: {0}")]
    Install(#[from] ServiceError),
    #[error("waiting for communication services: {0}")]
    Resolve(#[from] ResolveError),
}

impl ReconnectError {
    /// Whether the attempt was interrupted and may be retried.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == io::ErrorKind::Interrupted,
            Self::Resolve(e) => matches!(e, ResolveError::Cancelled { .. } | ResolveError::Timeout { .. }),
            _ => false,
        }
    }
}
