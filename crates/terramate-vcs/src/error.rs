//! Version control errors, kept distinguishable as "not a repo" vs
//! "command failed" so callers can tell a missing repository apart from a
//! git invocation that simply exited non-zero.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not a git repository")]
    NotARepo,

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("git {command} timed out")]
    Timeout { command: String },

    #[error("no remote named {0}")]
    NoSuchRemote(String),

    #[error("io error running git: {0}")]
    Io(#[from] std::io::Error),
}

pub type VcsResult<T> = std::result::Result<T, VcsError>;
