pub mod codec;
pub mod config;
pub mod connection;
pub mod crc;
pub mod errors;
pub mod function_table;
pub mod handler;
pub mod http_api;
pub mod logging;
pub mod pdu;
pub mod server;
pub mod transport;

pub use config::{Config, HttpConfig, LoggingConfig, RtuConfig, TcpConfig, TransportTarget};
pub use connection::{ConnectionGuard, ConnectionManager, ConnectionStats};
pub use errors::{ConfigError, FrameError, ProtocolErrorKind, ServerError, TransportError};
pub use handler::{HandlerResult, InMemoryDataStore, RequestHandler};
pub use pdu::{FunctionCode, Pdu};
pub use server::Server;
pub use transport::{RtuTransport, TcpTransport, Transport};
