use time::UtcOffset;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::config::LoggingConfig;
use crate::errors::ServerError;

pub fn setup_logging(config: &LoggingConfig) -> Result<(), ServerError> {
    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let mut env_filter = EnvFilter::default().add_directive(config.level_filter().into());

    if config.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_server::transport=trace".parse().unwrap())
            .add_directive("modbus_server::server=trace".parse().unwrap());
    }

    let layer = if config.format == "json" {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.thread_ids)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_level(true)
            .with_timer(timer)
            .json()
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.thread_ids)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_level(true)
            .with_timer(timer)
            .with_filter(env_filter)
            .boxed()
    };

    Registry::default().with(layer).try_init().map_err(|e| {
        ServerError::Config(crate::errors::ConfigError::invalid(format!(
            "failed to initialize logging: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_defaults_to_info_for_unknown_level() {
        let config = LoggingConfig {
            level: "nonsense".to_string(),
            ..Default::default()
        };
        assert_eq!(config.level_filter(), tracing::level_filters::LevelFilter::INFO);
    }

    #[test]
    fn level_filter_honors_debug() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(config.level_filter(), tracing::level_filters::LevelFilter::DEBUG);
    }
}
