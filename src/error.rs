//! Typed errors at the library boundary.

use std::io;

/// Everything that can go wrong constructing a client or running a probe.
///
/// [`PingError::UnreachableHost`] is included for completeness of the OS error
/// surface, but callers should rarely see it directly: the multiplexer turns
/// a send-time unreachable-route error into a `Lost` probe outcome rather
/// than propagating it (see [`crate::outcome::Outcome`]).
#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("permission denied opening {0:?} socket(s): {1}")]
    PermissionDenied(Vec<crate::socket::SocketKind>, io::Error),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("host unreachable")]
    UnreachableHost,
}

pub type Result<T> = std::result::Result<T, PingError>;
