use thiserror::Error;
use tokio::time::error::Elapsed;

/// Link-level failures, common to both the RTU serial link and TCP sockets.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout(#[from] Elapsed),

    #[error("link closed")]
    Closed,
}
