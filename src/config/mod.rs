mod http;
mod logging;
mod relay;
mod rtu;
mod tcp;
mod types;

pub use http::HttpConfig;
pub use logging::LoggingConfig;
pub use relay::{Config, TransportTarget};
pub use rtu::RtuConfig;
pub use tcp::TcpConfig;
pub use types::{DataBits, Parity, StopBits};
