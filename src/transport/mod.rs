mod rtu;
mod tcp;

pub use rtu::RtuTransport;
pub use tcp::TcpTransport;

use crate::errors::{FrameError, ServerError, TransportError};
use crate::pdu::Pdu;

/// A transport-agnostic link capable of reading requests and writing
/// responses. Implemented once per concrete transport (RTU, TCP); a worker
/// task owns exactly one live transport, so this is a plain trait rather
/// than a trait object.
pub trait Transport {
    /// Reads the next complete request frame.
    async fn read_request(&mut self) -> Result<Pdu, TransportReadError>;

    /// Writes a response frame for the given request PDU.
    async fn write_response(&mut self, response: &Pdu) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportReadError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] TransportError),
}

impl From<TransportReadError> for ServerError {
    fn from(err: TransportReadError) -> Self {
        match err {
            TransportReadError::Frame(e) => Self::Frame(e),
            TransportReadError::Io(e) => Self::Transport(e),
        }
    }
}
