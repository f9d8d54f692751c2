use serde::{Deserialize, Serialize};

/// Optional observability endpoint (`/health`, `/stats`). Off by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub bind_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: "127.0.0.1".to_string(),
            bind_port: 8081,
        }
    }
}
