//! The cloud client: a fixed-method-set capability interface plus a
//! `reqwest`-backed implementation. Every call carries a per-call deadline
//! and never logs the bearer token.

use std::time::Duration;

use async_trait::async_trait;
use terramate_core::StackStatus;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::error::{CloudError, CloudResult};
use crate::types::{
    CreateDeploymentPayload, CreateDriftPayload, CreatePreviewPayload, Organization,
    StackPreview, StackResult, UpdateDeploymentPayload,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn member_organizations(&self, token: &str) -> CloudResult<Vec<Organization>>;
    async fn stacks_by_status(
        &self,
        token: &str,
        org: &str,
        status: StackStatus,
    ) -> CloudResult<Vec<String>>;
    async fn create_deployment(
        &self,
        token: &str,
        org: &str,
        run_uuid: Uuid,
        payload: CreateDeploymentPayload,
    ) -> CloudResult<Vec<StackResult>>;
    async fn update_deployment(
        &self,
        token: &str,
        org: &str,
        payload: UpdateDeploymentPayload,
    ) -> CloudResult<()>;
    async fn create_preview(
        &self,
        token: &str,
        org: &str,
        payload: CreatePreviewPayload,
    ) -> CloudResult<Vec<StackPreview>>;
    async fn update_preview(
        &self,
        token: &str,
        org: &str,
        preview_id: &str,
        status: &str,
        details: Option<&str>,
    ) -> CloudResult<()>;
    async fn create_drift(
        &self,
        token: &str,
        org: &str,
        payload: CreateDriftPayload,
    ) -> CloudResult<()>;
}

pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCloudClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> CloudResult<T> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| CloudError::Transient("request timed out".to_string()))?
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            warn!(status = %status, "cloud request failed transiently");
            return Err(CloudError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(CloudError::Permanent(format!("status {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CloudError::Permanent(e.to_string()))
    }

    async fn request_no_body(&self, request: reqwest::RequestBuilder) -> CloudResult<()> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| CloudError::Transient("request timed out".to_string()))?
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CloudError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(CloudError::Permanent(format!("status {status}")));
        }
        Ok(())
    }
}

fn classify_transport_error(err: &reqwest::Error) -> CloudError {
    if err.is_timeout() || err.is_connect() {
        CloudError::Transient(err.to_string())
    } else {
        CloudError::Permanent(err.to_string())
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn member_organizations(&self, token: &str) -> CloudResult<Vec<Organization>> {
        let req = self
            .http
            .get(self.url("/v1/organizations"))
            .bearer_auth(token);
        self.request(req).await
    }

    async fn stacks_by_status(
        &self,
        token: &str,
        org: &str,
        status: StackStatus,
    ) -> CloudResult<Vec<String>> {
        let req = self
            .http
            .get(self.url(&format!("/v1/organizations/{org}/stacks")))
            .query(&[("status", status.to_string())])
            .bearer_auth(token);
        self.request(req).await
    }

    async fn create_deployment(
        &self,
        token: &str,
        org: &str,
        run_uuid: Uuid,
        payload: CreateDeploymentPayload,
    ) -> CloudResult<Vec<StackResult>> {
        let req = self
            .http
            .post(self.url(&format!("/v1/organizations/{org}/deployments/{run_uuid}")))
            .bearer_auth(token)
            .json(&payload);
        self.request(req).await
    }

    async fn update_deployment(
        &self,
        token: &str,
        org: &str,
        payload: UpdateDeploymentPayload,
    ) -> CloudResult<()> {
        let req = self
            .http
            .patch(self.url(&format!(
                "/v1/organizations/{org}/deployments/stacks/{}",
                payload.cloud_stack_id
            )))
            .bearer_auth(token)
            .json(&payload);
        self.request_no_body(req).await
    }

    async fn create_preview(
        &self,
        token: &str,
        org: &str,
        payload: CreatePreviewPayload,
    ) -> CloudResult<Vec<StackPreview>> {
        let req = self
            .http
            .post(self.url(&format!("/v1/organizations/{org}/previews")))
            .bearer_auth(token)
            .json(&payload);
        self.request(req).await
    }

    async fn update_preview(
        &self,
        token: &str,
        org: &str,
        preview_id: &str,
        status: &str,
        details: Option<&str>,
    ) -> CloudResult<()> {
        let req = self
            .http
            .patch(self.url(&format!("/v1/organizations/{org}/previews/{preview_id}")))
            .bearer_auth(token)
            .json(&serde_json::json!({ "status": status, "details": details }));
        self.request_no_body(req).await
    }

    async fn create_drift(
        &self,
        token: &str,
        org: &str,
        payload: CreateDriftPayload,
    ) -> CloudResult<()> {
        let req = self
            .http
            .post(self.url(&format!("/v1/organizations/{org}/drifts")))
            .bearer_auth(token)
            .json(&payload);
        self.request_no_body(req).await
    }
}
