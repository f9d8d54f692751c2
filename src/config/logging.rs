use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum log level.
    pub level: String,

    /// Log format ("pretty" or "json").
    pub format: String,

    /// Whether to include source file/line in log lines.
    pub include_location: bool,

    /// Whether to include thread IDs in log lines.
    pub thread_ids: bool,

    /// Emit full request/response frame bytes at trace level.
    pub trace_frames: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
            thread_ids: false,
            trace_frames: false,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.to_lowercase().as_str() {
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }
}
