//! Version control: a fixed-method-set capability interface plus a single
//! real implementation backed by the `git` CLI, cheaply cloneable and
//! shared read-mostly across a run.

pub mod error;
pub mod fake;
pub mod git;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use error::{VcsError, VcsResult};
pub use fake::FakeVcs;
pub use git::GitVcs;

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn rev_parse(&self, reference: &str) -> VcsResult<String>;
    async fn merge_base(&self, a: &str, b: &str) -> VcsResult<String>;
    async fn current_branch(&self) -> VcsResult<String>;
    async fn remotes(&self) -> VcsResult<Vec<String>>;
    async fn fetch_remote_rev(&self, remote: &str, branch: &str) -> VcsResult<String>;
    async fn diff_files(&self, base: &str, head: &str) -> VcsResult<Vec<PathBuf>>;
    async fn has_uncommitted(&self) -> VcsResult<bool>;
    async fn has_untracked(&self) -> VcsResult<bool>;
    async fn url(&self, remote: &str) -> VcsResult<String>;
    fn rootdir(&self) -> &Path;
}
