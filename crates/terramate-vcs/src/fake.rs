//! An in-memory `VersionControl` double for engine tests, grounded on the
//! same fixed-method-set contract as `GitVcs` but without a subprocess.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{VcsError, VcsResult};
use crate::VersionControl;

#[derive(Debug, Default)]
pub struct FakeVcs {
    pub is_repo: bool,
    pub revs: HashMap<String, String>,
    pub merge_bases: HashMap<(String, String), String>,
    pub current_branch: String,
    pub remotes: Vec<String>,
    pub remote_urls: HashMap<String, String>,
    pub remote_revs: HashMap<(String, String), String>,
    pub diffs: HashMap<(String, String), Vec<PathBuf>>,
    pub uncommitted: bool,
    pub untracked: bool,
    rootdir: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn new(rootdir: impl Into<PathBuf>) -> Self {
        Self {
            is_repo: true,
            rootdir: rootdir.into(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn rev_parse(&self, reference: &str) -> VcsResult<String> {
        self.record("rev_parse");
        if !self.is_repo {
            return Err(VcsError::NotARepo);
        }
        self.revs
            .get(reference)
            .cloned()
            .ok_or_else(|| VcsError::CommandFailed {
                command: format!("git rev-parse {reference}"),
                stderr: "unknown revision".to_string(),
            })
    }

    async fn merge_base(&self, a: &str, b: &str) -> VcsResult<String> {
        self.record("merge_base");
        self.merge_bases
            .get(&(a.to_string(), b.to_string()))
            .cloned()
            .ok_or_else(|| VcsError::CommandFailed {
                command: format!("git merge-base {a} {b}"),
                stderr: "no common ancestor".to_string(),
            })
    }

    async fn current_branch(&self) -> VcsResult<String> {
        self.record("current_branch");
        Ok(self.current_branch.clone())
    }

    async fn remotes(&self) -> VcsResult<Vec<String>> {
        self.record("remotes");
        Ok(self.remotes.clone())
    }

    async fn fetch_remote_rev(&self, remote: &str, branch: &str) -> VcsResult<String> {
        self.record("fetch_remote_rev");
        if !self.remotes.contains(&remote.to_string()) {
            return Err(VcsError::NoSuchRemote(remote.to_string()));
        }
        self.remote_revs
            .get(&(remote.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| VcsError::CommandFailed {
                command: format!("git ls-remote {remote} {branch}"),
                stderr: "unknown ref".to_string(),
            })
    }

    async fn diff_files(&self, base: &str, head: &str) -> VcsResult<Vec<PathBuf>> {
        self.record("diff_files");
        Ok(self
            .diffs
            .get(&(base.to_string(), head.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn has_uncommitted(&self) -> VcsResult<bool> {
        self.record("has_uncommitted");
        Ok(self.uncommitted)
    }

    async fn has_untracked(&self) -> VcsResult<bool> {
        self.record("has_untracked");
        Ok(self.untracked)
    }

    async fn url(&self, remote: &str) -> VcsResult<String> {
        self.record("url");
        self.remote_urls
            .get(remote)
            .cloned()
            .ok_or_else(|| VcsError::NoSuchRemote(remote.to_string()))
    }

    fn rootdir(&self) -> &Path {
        &self.rootdir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_for_assertions() {
        let fake = FakeVcs::new("/repo");
        let _ = fake.has_uncommitted().await;
        let _ = fake.has_untracked().await;
        assert_eq!(fake.calls(), vec!["has_uncommitted", "has_untracked"]);
    }
}
