use std::path::Path;

use serde::{Deserialize, Serialize};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::errors::ConfigError;

use super::{HttpConfig, LoggingConfig, RtuConfig, TcpConfig};

/// The transport this server will actually run, resolved from [`Config::url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Rtu { device: String },
    Tcp { addr: String },
}

fn parse_transport_url(url: &str) -> Result<TransportTarget, ConfigError> {
    if let Some(device) = url.strip_prefix("rtu://") {
        if device.is_empty() {
            return Err(ConfigError::invalid("rtu:// URL must name a device path"));
        }
        Ok(TransportTarget::Rtu {
            device: device.to_string(),
        })
    } else if let Some(addr) = url.strip_prefix("tcp://") {
        if addr.is_empty() {
            return Err(ConfigError::invalid("tcp:// URL must name a bind address"));
        }
        Ok(TransportTarget::Tcp {
            addr: addr.to_string(),
        })
    } else {
        Err(ConfigError::invalid(format!(
            "unsupported transport URL scheme: {url}"
        )))
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `rtu://<device>` or `tcp://<bind-addr>:<port>`. Selects the transport.
    pub url: String,

    pub rtu: RtuConfig,
    pub tcp: TcpConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:502".to_string(),
            rtu: RtuConfig::default(),
            tcp: TcpConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub const CONFIG_DIR: &'static str = "config";
    const ENV_PREFIX: &'static str = "MODBUS_SERVER";

    /// Builds configuration from, in increasing priority order:
    /// built-in defaults, `config/default.yaml`, `config/{RUN_MODE}.yaml`,
    /// `config/local.yaml`, and `MODBUS_SERVER_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = ConfigBuilder::builder()
            .add_source(
                File::new(
                    &format!("{}/default", Self::CONFIG_DIR),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(
                    &format!("{}/{}", Self::CONFIG_DIR, environment),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let built = builder.build().map_err(ConfigError::Source)?;

        let config: Self = if built.collect().map(|m| m.is_empty()).unwrap_or(true) {
            Self::default()
        } else {
            ConfigBuilder::builder()
                .add_source(config::Config::try_from(&Self::default()).map_err(ConfigError::Source)?)
                .add_source(
                    File::new(
                        &format!("{}/default", Self::CONFIG_DIR),
                        FileFormat::Yaml,
                    )
                    .required(false),
                )
                .add_source(
                    File::new(
                        &format!("{}/{}", Self::CONFIG_DIR, environment),
                        FileFormat::Yaml,
                    )
                    .required(false),
                )
                .add_source(
                    File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml)
                        .required(false),
                )
                .add_source(
                    Environment::with_prefix(Self::ENV_PREFIX)
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                )
                .build()
                .map_err(ConfigError::Source)?
                .try_deserialize()
                .map_err(ConfigError::Source)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a single explicit file, with environment
    /// variables still applied as overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let built = ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("_")
                    .try_parsing(true),
            )
            .build()
            .map_err(ConfigError::Source)?;

        let config: Self = built.try_deserialize().map_err(ConfigError::Source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn transport_target(&self) -> Result<TransportTarget, ConfigError> {
        parse_transport_url(&self.url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let target = self.transport_target()?;

        match &target {
            TransportTarget::Rtu { .. } => {
                if self.rtu.accepted_unit_ids.is_empty() {
                    return Err(ConfigError::invalid(
                        "rtu.accepted_unit_ids must not be empty",
                    ));
                }
                if self.rtu.baud_rate == 0 {
                    return Err(ConfigError::invalid("rtu.baud_rate must be non-zero"));
                }
                if self.rtu.timeout.is_zero() {
                    return Err(ConfigError::invalid("rtu.timeout must be non-zero"));
                }
            }
            TransportTarget::Tcp { .. } => {
                if self.tcp.max_clients == 0 {
                    return Err(ConfigError::invalid("tcp.max_clients must be non-zero"));
                }
                if self.tcp.timeout.is_zero() {
                    return Err(ConfigError::invalid("tcp.timeout must be non-zero"));
                }
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::invalid("invalid logging.level")),
        }
        match self.logging.format.to_lowercase().as_str() {
            "pretty" | "json" => {}
            _ => return Err(ConfigError::invalid("invalid logging.format")),
        }

        if self.http.enabled && self.http.bind_addr.is_empty() {
            return Err(ConfigError::invalid("http.bind_addr must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rtu_url_selects_rtu_target() {
        let mut config = Config::default();
        config.url = "rtu:///dev/ttyUSB0".to_string();
        assert_eq!(
            config.transport_target().unwrap(),
            TransportTarget::Rtu {
                device: "/dev/ttyUSB0".to_string()
            }
        );
    }

    #[test]
    fn empty_accepted_unit_ids_rejected_for_rtu() {
        let mut config = Config::default();
        config.url = "rtu:///dev/ttyUSB0".to_string();
        config.rtu.accepted_unit_ids.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_clients_rejected_for_tcp() {
        let mut config = Config::default();
        config.tcp.max_clients = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let mut config = Config::default();
        config.url = "udp://127.0.0.1:502".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn file_config_overrides_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
            url: "tcp://0.0.0.0:1502"
            rtu:
              baud_rate: 19200
              data_bits: 8
              parity: "even"
              stop_bits: "one"
              timeout: "10s"
              accepted_unit_ids: [1, 2]
            tcp:
              timeout: "30s"
              max_clients: 5
            http:
              enabled: false
              bind_addr: "127.0.0.1"
              bind_port: 8081
            logging:
              level: "debug"
              format: "json"
              include_location: true
              thread_ids: true
              trace_frames: false
            "#,
        )
        .unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.url, "tcp://0.0.0.0:1502");
        assert_eq!(config.tcp.max_clients, 5);
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.logging.level, "debug");
    }
}
