//! Error kinds shared by every stack-orchestration crate.
//!
//! These are kinds, not types: one enum carries every fatal condition the
//! core can raise, tagged with the structured context callers need (a cycle
//! witness, a missing stack id, ...).

use thiserror::Error;

use crate::path::ProjectPath;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid project configuration: {0}")]
    Config(String),

    #[error("not a git repository, or repository features required but unavailable")]
    RepoNotFound,

    #[error("version control command failed: {0}")]
    VcsFailed(String),

    #[error("baseline is outdated: HEAD is not reachable from the remote default tip")]
    OutdatedBase,

    #[error("cycle detected: {}", witness.iter().map(ProjectPath::as_str).collect::<Vec<_>>().join(" -> "))]
    Cycle { witness: Vec<ProjectPath> },

    #[error("stack {stack} has no id, but cloud sync was requested for it")]
    StackMissingId { stack: ProjectPath },

    #[error("command not found on PATH: {program}")]
    CommandNotFound { program: String },

    #[error("run failed for stack {stack}: {message}")]
    RunFailed { stack: ProjectPath, message: String },

    #[error("run canceled")]
    RunCanceled,

    #[error("cloud request failed (transient): {0}")]
    CloudTransient(String),

    #[error("cloud request failed (permanent): {0}")]
    CloudPermanent(String),

    #[error("safeguard `{name}` triggered: {message}")]
    Safeguard { name: &'static str, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
