//! Cloud errors are never fatal to local execution; the two retryable vs.
//! permanent variants let the sync observer decide whether to back off and
//! retry or disable cloud features outright.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud request failed (retryable): {0}")]
    Transient(String),

    #[error("cloud request failed (permanent): {0}")]
    Permanent(String),

    #[error("no usable credentials")]
    NoCredentials,

    #[error("ambiguous organization: belongs to multiple organizations, none selected via TM_CLOUD_ORGANIZATION")]
    AmbiguousOrganization,

    #[error("unknown organization: {0}")]
    UnknownOrganization(String),
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;
