use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-connection parameters for the TCP/MBAP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum number of concurrently accepted clients.
    pub max_clients: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_clients: 10,
        }
    }
}
