//! Stack: an orchestration unit in the project tree.

use serde::{Deserialize, Serialize};

use crate::path::ProjectPath;

/// A directory that holds IaC to be executed together.
///
/// `before`/`after`/`wanted_by` are kept as raw tokens here (absolute
/// paths, stack-relative paths, or glob patterns); resolving them against
/// the project index is the index's job, not this type's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub path: ProjectPath,
    /// UUID-shaped string; compared case-insensitively for cloud identity.
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub wanted_by: Vec<String>,
    /// Extra files whose change marks this stack changed.
    pub watch: Vec<String>,
}

impl Stack {
    pub fn new(path: ProjectPath) -> Self {
        Self {
            path,
            id: None,
            name: None,
            description: None,
            tags: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            wanted_by: Vec::new(),
            watch: Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Case-insensitive identity comparison, per the cloud identity rule.
    pub fn id_matches(&self, other: &str) -> bool {
        self.id
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(other))
    }
}

/// Cloud-facing stack status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackStatus {
    Ok,
    Drifted,
    Failed,
    Canceled,
    /// Terminal-only: never a valid status to enter, only to observe when
    /// a cloud `status` value is unrecognized.
    Unknown,
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StackStatus::Ok => "ok",
            StackStatus::Drifted => "drifted",
            StackStatus::Failed => "failed",
            StackStatus::Canceled => "canceled",
            StackStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Deployment-run status as tracked by the cloud service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Canceled,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Ok => "ok",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_matches_is_case_insensitive() {
        let mut stack = Stack::new(ProjectPath::try_new("/a").unwrap());
        stack.id = Some("ABCD-1234".to_string());
        assert!(stack.id_matches("abcd-1234"));
        assert!(!stack.id_matches("other"));
    }
}
