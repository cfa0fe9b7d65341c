//! An in-memory `CloudClient` double for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use terramate_core::StackStatus;
use uuid::Uuid;

use crate::client::CloudClient;
use crate::error::CloudResult;
use crate::types::{
    CreateDeploymentPayload, CreateDriftPayload, CreatePreviewPayload, Organization,
    StackPreview, StackResult, UpdateDeploymentPayload,
};

#[derive(Default)]
pub struct FakeCloudClient {
    pub organizations: Vec<Organization>,
    pub stacks_by_status: HashMap<String, Vec<String>>,
    pub next_cloud_id: Mutex<u64>,
    pub updates: Mutex<Vec<UpdateDeploymentPayload>>,
    pub fail_create_deployment: bool,
}

#[async_trait]
impl CloudClient for FakeCloudClient {
    async fn member_organizations(&self, _token: &str) -> CloudResult<Vec<Organization>> {
        Ok(self.organizations.clone())
    }

    async fn stacks_by_status(
        &self,
        _token: &str,
        org: &str,
        status: StackStatus,
    ) -> CloudResult<Vec<String>> {
        Ok(self
            .stacks_by_status
            .get(&format!("{org}:{status}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_deployment(
        &self,
        _token: &str,
        _org: &str,
        _run_uuid: Uuid,
        payload: CreateDeploymentPayload,
    ) -> CloudResult<Vec<StackResult>> {
        if self.fail_create_deployment {
            return Err(crate::error::CloudError::Transient("fake failure".into()));
        }
        let mut next_id = self.next_cloud_id.lock().unwrap();
        let results = payload
            .stacks
            .into_iter()
            .map(|s| {
                *next_id += 1;
                StackResult {
                    stack_path: s.stack_path,
                    cloud_stack_id: *next_id,
                }
            })
            .collect();
        Ok(results)
    }

    async fn update_deployment(
        &self,
        _token: &str,
        _org: &str,
        payload: UpdateDeploymentPayload,
    ) -> CloudResult<()> {
        self.updates.lock().unwrap().push(payload);
        Ok(())
    }

    async fn create_preview(
        &self,
        _token: &str,
        _org: &str,
        payload: CreatePreviewPayload,
    ) -> CloudResult<Vec<StackPreview>> {
        let mut next_id = self.next_cloud_id.lock().unwrap();
        let results = payload
            .stacks
            .into_iter()
            .map(|s| {
                *next_id += 1;
                StackPreview {
                    stack_path: s.stack_path,
                    preview_id: format!("preview-{next_id}"),
                }
            })
            .collect();
        Ok(results)
    }

    async fn update_preview(
        &self,
        _token: &str,
        _org: &str,
        _preview_id: &str,
        _status: &str,
        _details: Option<&str>,
    ) -> CloudResult<()> {
        Ok(())
    }

    async fn create_drift(
        &self,
        _token: &str,
        _org: &str,
        _payload: CreateDriftPayload,
    ) -> CloudResult<()> {
        Ok(())
    }
}
