//! Cloud-sync lifecycle identifiers, scoped to exactly one invocation.

use std::collections::HashMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path::ProjectPath;

/// Identifies one invocation that touches the cloud. Fresh per `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RunUuid(Uuid);

impl RunUuid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunUuid {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloud-assigned numeric id, populated once the cloud acknowledges a
/// deployment creation.
pub type CloudDeploymentIds = HashMap<ProjectPath, i64>;

/// Cloud-assigned preview id, same lifetime as `CloudDeploymentIds`.
pub type CloudPreviewIds = HashMap<ProjectPath, String>;
