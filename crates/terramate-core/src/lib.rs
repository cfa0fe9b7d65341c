//! Core domain types and errors for the Terramate stack orchestration
//! engine.
//!
//! This crate contains:
//! - The project path factory, normalizing and validating stack addresses
//! - Stack and cloud lifecycle status types
//! - The DAG data structure
//! - Run-time task types (run tasks, stack runs)
//! - The shared error taxonomy

pub mod dag;
pub mod error;
pub mod lifecycle;
pub mod path;
pub mod run;
pub mod stack;

pub use dag::Dag;
pub use error::{Error, Result};
pub use lifecycle::{CloudDeploymentIds, CloudPreviewIds, RunUuid};
pub use path::ProjectPath;
pub use run::{RunTask, StackRun};
pub use stack::{DeploymentStatus, Stack, StackStatus};
