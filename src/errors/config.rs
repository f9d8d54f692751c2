use thiserror::Error;

/// Configuration load/validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),

    #[error("configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn invalid(details: impl Into<String>) -> Self {
        Self::Invalid(details.into())
    }
}
