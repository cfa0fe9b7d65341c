//! Configuration loading errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: kdl::KdlError,
    },

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate stack path: {0}")]
    Duplicate(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] terramate_core::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
