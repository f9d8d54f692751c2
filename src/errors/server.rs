use std::net::SocketAddr;
use thiserror::Error;

use super::{ConfigError, FrameError, ProtocolErrorKind, TransportError};

/// Top-level error type returned by the library's public API.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol error: {kind} - {details}")]
    Protocol {
        kind: ProtocolErrorKind,
        details: String,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("client error from {addr}: {details}")]
    Client { addr: SocketAddr, details: String },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}

impl ServerError {
    pub fn protocol(kind: ProtocolErrorKind, details: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            details: details.into(),
        }
    }

    pub fn client(addr: SocketAddr, details: impl Into<String>) -> Self {
        Self::Client {
            addr,
            details: details.into(),
        }
    }
}
