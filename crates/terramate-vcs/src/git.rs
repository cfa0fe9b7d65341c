//! `GitVcs`: the `VersionControl` implementation backed by a `git` subprocess.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{VcsError, VcsResult};
use crate::VersionControl;

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// A `VersionControl` implementation that shells out to `git` in `rootdir`.
/// Cheap to clone: it only carries the repository path.
#[derive(Debug, Clone)]
pub struct GitVcs {
    rootdir: PathBuf,
}

impl GitVcs {
    pub fn new(rootdir: impl Into<PathBuf>) -> Self {
        Self {
            rootdir: rootdir.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> VcsResult<String> {
        let command_label = format!("git {}", args.join(" "));
        debug!(command = %command_label, "running git");

        let output = tokio::time::timeout(
            SUBPROCESS_TIMEOUT,
            Command::new("git")
                .args(args)
                .current_dir(&self.rootdir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| VcsError::Timeout {
            command: command_label.clone(),
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_not_a_repo(&stderr) {
                return Err(VcsError::NotARepo);
            }
            warn!(command = %command_label, stderr = %stderr, "git command failed");
            return Err(VcsError::CommandFailed {
                command: command_label,
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn is_not_a_repo(stderr: &str) -> bool {
    stderr.contains("not a git repository")
}

#[async_trait]
impl VersionControl for GitVcs {
    async fn rev_parse(&self, reference: &str) -> VcsResult<String> {
        self.run(&["rev-parse", reference]).await
    }

    async fn merge_base(&self, a: &str, b: &str) -> VcsResult<String> {
        self.run(&["merge-base", a, b]).await
    }

    async fn current_branch(&self) -> VcsResult<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn remotes(&self) -> VcsResult<Vec<String>> {
        let out = self.run(&["remote"]).await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    async fn fetch_remote_rev(&self, remote: &str, branch: &str) -> VcsResult<String> {
        let remotes = self.remotes().await?;
        if !remotes.iter().any(|r| r == remote) {
            return Err(VcsError::NoSuchRemote(remote.to_string()));
        }
        self.run(&["ls-remote", "--exit-code", remote, branch])
            .await
            .and_then(|out| {
                out.split_whitespace()
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| VcsError::CommandFailed {
                        command: format!("git ls-remote {remote} {branch}"),
                        stderr: "empty ls-remote output".to_string(),
                    })
            })
    }

    async fn diff_files(&self, base: &str, head: &str) -> VcsResult<Vec<PathBuf>> {
        let out = self
            .run(&["diff", "--name-only", &format!("{base}..{head}")])
            .await?;
        Ok(out.lines().map(PathBuf::from).collect())
    }

    async fn has_uncommitted(&self) -> VcsResult<bool> {
        let out = self.run(&["diff", "--name-only", "HEAD"]).await?;
        Ok(!out.trim().is_empty())
    }

    async fn has_untracked(&self) -> VcsResult<bool> {
        let out = self
            .run(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        Ok(!out.trim().is_empty())
    }

    async fn url(&self, remote: &str) -> VcsResult<String> {
        self.run(&["remote", "get-url", remote]).await.map_err(|e| match e {
            VcsError::CommandFailed { .. } => VcsError::NoSuchRemote(remote.to_string()),
            other => other,
        })
    }

    fn rootdir(&self) -> &Path {
        &self.rootdir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn detects_uncommitted_changes() {
        let dir = init_repo().await;
        let vcs = GitVcs::new(dir.path());
        assert!(!vcs.has_uncommitted().await.unwrap());
        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        assert!(vcs.has_uncommitted().await.unwrap());
    }

    #[tokio::test]
    async fn detects_untracked_files() {
        let dir = init_repo().await;
        let vcs = GitVcs::new(dir.path());
        assert!(!vcs.has_untracked().await.unwrap());
        std::fs::write(dir.path().join("b.txt"), "new").unwrap();
        assert!(vcs.has_untracked().await.unwrap());
    }

    #[tokio::test]
    async fn rev_parse_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let vcs = GitVcs::new(dir.path());
        let err = vcs.rev_parse("HEAD").await.unwrap_err();
        assert!(matches!(err, VcsError::NotARepo));
    }
}
