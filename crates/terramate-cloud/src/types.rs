//! Wire payloads exchanged with the cloud service.

use serde::{Deserialize, Serialize};
use terramate_core::StackStatus;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub name: String,
    pub status: OrganizationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationStatus {
    Active,
    Trusted,
    Suspended,
}

impl OrganizationStatus {
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Active | Self::Trusted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryMetadata {
    pub url: String,
    pub default_branch: String,
    pub head_commit: String,
    pub review_request: Option<ReviewRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub head_sha: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackDeploymentRequest {
    pub stack_path: String,
    pub stack_id: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDeploymentPayload {
    pub run_uuid: Uuid,
    pub repository: RepositoryMetadata,
    pub stacks: Vec<StackDeploymentRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackResult {
    pub stack_path: String,
    pub cloud_stack_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateDeploymentPayload {
    pub cloud_stack_id: u64,
    pub status: DeploymentStatusWire,
    pub changeset: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatusWire {
    Pending,
    Running,
    Ok,
    Failed,
    Canceled,
}

impl From<StackStatus> for DeploymentStatusWire {
    fn from(value: StackStatus) -> Self {
        match value {
            StackStatus::Ok => Self::Ok,
            StackStatus::Drifted => Self::Ok,
            StackStatus::Failed => Self::Failed,
            StackStatus::Canceled => Self::Canceled,
            StackStatus::Unknown => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePreviewPayload {
    pub repository: RepositoryMetadata,
    pub stacks: Vec<StackDeploymentRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackPreview {
    pub stack_path: String,
    pub preview_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDriftPayload {
    pub cloud_stack_id: u64,
    pub status: String,
    pub details: Option<String>,
}
