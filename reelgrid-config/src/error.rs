use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration key not found: {0}")]
    MissingKey(String),

    #[error("configuration key {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("configuration file error: {0}")]
    File(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
