mod config;
mod frame;
mod protocol;
mod server;
mod transport;

pub use config::ConfigError;
pub use frame::FrameError;
pub use protocol::ProtocolErrorKind;
pub use server::ServerError;
pub use transport::TransportError;
