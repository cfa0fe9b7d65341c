//! Cloud Sync Lifecycle: a `RunObserver` that mirrors a run's progress to
//! the cloud service. Any cloud failure disables the feature for the rest
//! of the run with a single warning — local execution never aborts because
//! the cloud happened to be unreachable.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use terramate_cloud::{
    CloudClient, CloudError, CloudResult, CredentialChain, CredentialProvider,
};
use terramate_cloud::types::{
    CreateDeploymentPayload, CreateDriftPayload, CreatePreviewPayload, DeploymentStatusWire,
    RepositoryMetadata, StackDeploymentRequest, UpdateDeploymentPayload,
};
use terramate_core::{CloudDeploymentIds, CloudPreviewIds, Error, ProjectPath, Result, RunUuid, StackRun, StackStatus};
use tokio::sync::Mutex as AsyncMutex;

use crate::scheduler::{RunObserver, RunSummary, TaskOutcome};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
struct StackSyncInfo {
    id: Option<String>,
    wants_deployment: bool,
    wants_drift: bool,
    wants_preview: bool,
    command: Vec<String>,
}

pub struct CloudSync {
    client: Arc<dyn CloudClient>,
    token: StdMutex<String>,
    org: String,
    run_uuid: RunUuid,
    repository: RepositoryMetadata,
    stacks: BTreeMap<ProjectPath, StackSyncInfo>,
    plan_files: BTreeMap<(ProjectPath, usize), PathBuf>,
    deployment_ids: AsyncMutex<CloudDeploymentIds>,
    preview_ids: AsyncMutex<CloudPreviewIds>,
    cloud_stack_ids: AsyncMutex<BTreeMap<ProjectPath, u64>>,
    disabled: AtomicBool,
}

impl CloudSync {
    /// Resolve credentials and an organization, degrading to "no cloud
    /// sync" (logging once) rather than failing the caller on any of the
    /// steps that are inherently environmental: missing credentials,
    /// unreachable API, or an ambiguous/unknown organization.
    pub async fn connect(
        client: Arc<dyn CloudClient>,
        org_override: Option<&str>,
        repository: RepositoryMetadata,
        stack_runs: &BTreeMap<ProjectPath, StackRun>,
    ) -> Option<Self> {
        let Some(mut provider) = CredentialChain::resolve().await else {
            tracing::warn!("no usable cloud credentials found, disabling cloud sync");
            return None;
        };
        if provider.is_expired() {
            if let Err(e) = provider.refresh().await {
                tracing::warn!(error = %e, "failed to refresh cloud credentials, disabling cloud sync");
                return None;
            }
        }
        let token = provider.token().to_string();

        let organizations = match provider.organizations(&*client).await {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list cloud organizations, disabling cloud sync");
                return None;
            }
        };

        let org = match org_override {
            Some(wanted) => match organizations.iter().find(|o| o.name == wanted) {
                Some(o) if o.status.is_usable() => o.name.clone(),
                Some(_) | None => {
                    tracing::warn!(org = wanted, "unknown or unusable cloud organization, disabling cloud sync");
                    return None;
                }
            },
            None => {
                let usable: Vec<_> = organizations.iter().filter(|o| o.status.is_usable()).collect();
                match usable.as_slice() {
                    [one] => one.name.clone(),
                    _ => {
                        tracing::warn!("ambiguous cloud organization membership, disabling cloud sync");
                        return None;
                    }
                }
            }
        };

        let mut stacks = BTreeMap::new();
        let mut plan_files = BTreeMap::new();
        for (path, stack_run) in stack_runs {
            let info = StackSyncInfo {
                id: stack_run.stack.id.clone(),
                wants_deployment: stack_run.tasks.iter().any(|t| t.sync_deployment),
                wants_drift: stack_run.tasks.iter().any(|t| t.sync_drift),
                wants_preview: stack_run.tasks.iter().any(|t| t.sync_preview),
                command: stack_run.tasks.first().map(|t| t.argv.clone()).unwrap_or_default(),
            };
            stacks.insert(path.clone(), info);
            for (index, task) in stack_run.tasks.iter().enumerate() {
                if let Some(plan_file) = &task.plan_file {
                    plan_files.insert((path.clone(), index), plan_file.clone());
                }
            }
        }

        Some(Self {
            client,
            token: StdMutex::new(token),
            org,
            run_uuid: RunUuid::new(),
            repository,
            stacks,
            plan_files,
            deployment_ids: AsyncMutex::new(CloudDeploymentIds::new()),
            preview_ids: AsyncMutex::new(CloudPreviewIds::new()),
            cloud_stack_ids: AsyncMutex::new(BTreeMap::new()),
            disabled: AtomicBool::new(false),
        })
    }

    fn token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    fn disable(&self, reason: &str) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            tracing::warn!(reason, "disabling cloud sync for the rest of this run");
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    async fn create_deployment_matrix(&self, stacks: &[ProjectPath]) -> CloudResult<()> {
        let requests: Vec<StackDeploymentRequest> = stacks
            .iter()
            .filter_map(|p| {
                let info = self.stacks.get(p)?;
                Some(StackDeploymentRequest {
                    stack_path: p.as_str().to_string(),
                    stack_id: info.id.clone().unwrap_or_default(),
                    command: info.command.clone(),
                })
            })
            .collect();
        if requests.is_empty() {
            return Ok(());
        }

        let payload = CreateDeploymentPayload {
            run_uuid: self.run_uuid.as_uuid(),
            repository: self.repository.clone(),
            stacks: requests,
        };
        let token = self.token();
        let results = with_retry(|| self.client.create_deployment(&token, &self.org, self.run_uuid.as_uuid(), payload.clone())).await?;

        let mut ids = self.cloud_stack_ids.lock().await;
        for result in results {
            if let Ok(path) = ProjectPath::try_new(&result.stack_path) {
                ids.insert(path.clone(), result.cloud_stack_id);
                self.deployment_ids.lock().await.insert(path, result.cloud_stack_id as i64);
            }
        }
        Ok(())
    }

    async fn create_preview_matrix(&self, stacks: &[ProjectPath]) -> CloudResult<()> {
        let requests: Vec<StackDeploymentRequest> = stacks
            .iter()
            .filter_map(|p| {
                let info = self.stacks.get(p)?;
                Some(StackDeploymentRequest {
                    stack_path: p.as_str().to_string(),
                    stack_id: info.id.clone().unwrap_or_default(),
                    command: info.command.clone(),
                })
            })
            .collect();
        if requests.is_empty() {
            return Ok(());
        }

        let payload = CreatePreviewPayload {
            repository: self.repository.clone(),
            stacks: requests,
        };
        let token = self.token();
        let previews = with_retry(|| self.client.create_preview(&token, &self.org, payload.clone())).await?;

        let mut ids = self.preview_ids.lock().await;
        for preview in previews {
            if let Ok(path) = ProjectPath::try_new(&preview.stack_path) {
                ids.insert(path, preview.preview_id);
            }
        }
        Ok(())
    }

    async fn update_deployment_status(
        &self,
        stack: &ProjectPath,
        status: DeploymentStatusWire,
        changeset: Option<String>,
    ) -> CloudResult<()> {
        let Some(cloud_stack_id) = self.cloud_stack_ids.lock().await.get(stack).copied() else {
            return Ok(());
        };
        let token = self.token();
        let payload = UpdateDeploymentPayload {
            cloud_stack_id,
            status,
            changeset,
        };
        with_retry(|| self.client.update_deployment(&token, &self.org, payload.clone())).await
    }

    async fn update_preview_status(&self, stack: &ProjectPath, status: &str) -> CloudResult<()> {
        let preview_id = self.preview_ids.lock().await.get(stack).cloned();
        let Some(preview_id) = preview_id else {
            return Ok(());
        };
        let token = self.token();
        with_retry(|| self.client.update_preview(&token, &self.org, &preview_id, status, None)).await
    }

    async fn report_drift(&self, stack: &ProjectPath, outcome: &TaskOutcome, changeset: Option<String>) -> CloudResult<()> {
        let Some(cloud_stack_id) = self.cloud_stack_ids.lock().await.get(stack).copied() else {
            return Ok(());
        };
        let status = drift_status_from_outcome(outcome);
        let token = self.token();
        let payload = CreateDriftPayload {
            cloud_stack_id,
            status: status.to_string(),
            details: changeset,
        };
        with_retry(|| self.client.create_drift(&token, &self.org, payload.clone())).await
    }
}

#[async_trait]
impl RunObserver for CloudSync {
    async fn before_all(&self, order: &[ProjectPath]) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }

        for path in order {
            if let Some(info) = self.stacks.get(path) {
                let wants_sync = info.wants_deployment || info.wants_drift || info.wants_preview;
                if wants_sync && info.id.is_none() {
                    return Err(Error::StackMissingId { stack: path.clone() });
                }
            }
        }

        let deployment_stacks: Vec<ProjectPath> = order
            .iter()
            .filter(|p| self.stacks.get(*p).is_some_and(|i| i.wants_deployment))
            .cloned()
            .collect();
        let preview_stacks: Vec<ProjectPath> = order
            .iter()
            .filter(|p| self.stacks.get(*p).is_some_and(|i| i.wants_preview))
            .cloned()
            .collect();

        if let Err(e) = self.create_deployment_matrix(&deployment_stacks).await {
            self.disable(&e.to_string());
        }
        if !self.is_disabled() {
            if let Err(e) = self.create_preview_matrix(&preview_stacks).await {
                self.disable(&e.to_string());
            }
        }
        Ok(())
    }

    async fn before_task(&self, stack: &ProjectPath, task_index: usize) -> Result<()> {
        if self.is_disabled() || task_index != 0 {
            return Ok(());
        }
        let Some(info) = self.stacks.get(stack) else {
            return Ok(());
        };

        if info.wants_deployment {
            if let Err(e) = self
                .update_deployment_status(stack, DeploymentStatusWire::Running, None)
                .await
            {
                self.disable(&e.to_string());
            }
        }
        if info.wants_preview {
            if let Err(e) = self.update_preview_status(stack, "pending").await {
                self.disable(&e.to_string());
            }
        }
        if info.wants_drift {
            // No deployment entity backs a pure drift check, so there is no
            // status endpoint to call yet; `create_drift` after the task is
            // what actually records the finding.
            tracing::debug!(stack = %stack, "drift check pending");
        }
        Ok(())
    }

    async fn after_task(&self, stack: &ProjectPath, task_index: usize, outcome: &TaskOutcome) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }
        let Some(info) = self.stacks.get(stack).cloned() else {
            return Ok(());
        };

        let changeset = self
            .plan_files
            .get(&(stack.clone(), task_index))
            .map(|path| capture_changeset(path));

        if info.wants_deployment {
            let status: DeploymentStatusWire = status_from_outcome(outcome).into();
            if let Err(e) = self.update_deployment_status(stack, status, changeset.clone()).await {
                self.disable(&e.to_string());
            }
        }
        if !self.is_disabled() && info.wants_preview {
            if let Err(e) = self.update_preview_status(stack, preview_status_str(outcome)).await {
                self.disable(&e.to_string());
            }
        }
        if !self.is_disabled() && info.wants_drift {
            if let Err(e) = self.report_drift(stack, outcome, changeset).await {
                self.disable(&e.to_string());
            }
        }
        Ok(())
    }

    async fn after_all(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// `sync_deployment` mapping: success -> ok, canceled -> canceled, anything
/// else (failed, command-not-found) -> failed. Drift is not a deployment
/// outcome; see `drift_status_from_outcome` for that mapping.
fn status_from_outcome(outcome: &TaskOutcome) -> StackStatus {
    match outcome {
        TaskOutcome::Success { .. } => StackStatus::Ok,
        TaskOutcome::Failed { .. } => StackStatus::Failed,
        TaskOutcome::Canceled => StackStatus::Canceled,
    }
}

/// `sync_drift` mapping, keyed off the task's raw exit code: 0 -> ok, 2 ->
/// drifted, any other code or a failure with no code -> failed, signal ->
/// canceled.
fn drift_status_from_outcome(outcome: &TaskOutcome) -> StackStatus {
    match outcome {
        TaskOutcome::Canceled => StackStatus::Canceled,
        TaskOutcome::Success { .. } | TaskOutcome::Failed { .. } => match outcome.exit_code() {
            Some(0) => StackStatus::Ok,
            Some(2) => StackStatus::Drifted,
            _ => StackStatus::Failed,
        },
    }
}

/// Preview status strings the cloud API doesn't model beyond
/// changed/failed/canceled collapse to "failed" — the `Failed` arm already
/// covers every outcome that isn't a clean success or a cancellation.
fn preview_status_str(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Success { .. } => "changed",
        TaskOutcome::Canceled => "canceled",
        TaskOutcome::Failed { .. } => "failed",
    }
}

fn capture_changeset(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => "details omitted".to_string(),
    }
}

async fn with_retry<T, F, Fut>(mut f: F) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(CloudError::Transient(message)) if attempt + 1 < MAX_RETRIES => {
                attempt += 1;
                let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
                tracing::debug!(attempt, %message, "retrying transient cloud failure");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_status_collapses_unknown_outcomes_to_failed() {
        assert_eq!(
            preview_status_str(&TaskOutcome::Failed { message: "boom".to_string(), exit_code: None }),
            "failed"
        );
        assert_eq!(preview_status_str(&TaskOutcome::Success { exit_code: Some(0) }), "changed");
        assert_eq!(preview_status_str(&TaskOutcome::Canceled), "canceled");
    }

    #[test]
    fn drift_status_maps_exit_codes() {
        assert_eq!(drift_status_from_outcome(&TaskOutcome::Success { exit_code: Some(0) }), StackStatus::Ok);
        assert_eq!(
            drift_status_from_outcome(&TaskOutcome::Failed { message: "drift".to_string(), exit_code: Some(2) }),
            StackStatus::Drifted
        );
        assert_eq!(
            drift_status_from_outcome(&TaskOutcome::Failed { message: "boom".to_string(), exit_code: Some(1) }),
            StackStatus::Failed
        );
        assert_eq!(
            drift_status_from_outcome(&TaskOutcome::Failed { message: "boom".to_string(), exit_code: None }),
            StackStatus::Failed
        );
        assert_eq!(drift_status_from_outcome(&TaskOutcome::Canceled), StackStatus::Canceled);
    }

    #[test]
    fn capture_changeset_degrades_on_unreadable_file() {
        let result = capture_changeset(&PathBuf::from("/does/not/exist/plan.json"));
        assert_eq!(result, "details omitted");
    }
}
