//! Safeguards: pre-execution consistency checks that can abort a run.
//! Each one is independently disableable (see `terramate_config::options`);
//! git-family safeguards are silently skipped when there is no remote
//! configured or the VCS is unavailable.

use std::path::Path;

use sha2::{Digest, Sha256};
use terramate_config::SafeguardToggles;
use terramate_core::{Error, ProjectPath, Result};
use terramate_vcs::VersionControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeguardContext {
    Run,
    List,
}

/// One safeguard finding: a warning in `list` context, a fatal error in
/// `run` context.
#[derive(Debug, Clone)]
pub struct SafeguardWarning {
    pub name: &'static str,
    pub message: String,
}

pub struct SafeguardReport {
    pub warnings: Vec<SafeguardWarning>,
}

/// Run every enabled safeguard. In `Run` context, the first triggered
/// safeguard returns `ErrSafeguard` immediately (fatal); in `List` context,
/// every trigger is collected as a warning instead.
pub async fn check_safeguards(
    vcs: Option<&dyn VersionControl>,
    toggles: &SafeguardToggles,
    default_remote: Option<&str>,
    default_branch: &str,
    context: SafeguardContext,
) -> Result<SafeguardReport> {
    let mut warnings = Vec::new();

    if let Some(vcs) = vcs {
        if default_remote.is_some() {
            if toggles.git_untracked {
                if vcs.has_untracked().await.unwrap_or(false) {
                    trigger(
                        &mut warnings,
                        context,
                        "git-untracked",
                        "working tree has untracked files".to_string(),
                    )?;
                }
            }
            if toggles.git_uncommitted {
                if vcs.has_uncommitted().await.unwrap_or(false) {
                    trigger(
                        &mut warnings,
                        context,
                        "git-uncommitted",
                        "working tree has uncommitted changes".to_string(),
                    )?;
                }
            }
            if toggles.git_out_of_sync {
                if let Some(remote) = default_remote {
                    if out_of_sync(vcs, remote, default_branch).await {
                        trigger(
                            &mut warnings,
                            context,
                            "git-out-of-sync",
                            "HEAD is not reachable from the remote default tip".to_string(),
                        )?;
                    }
                }
            }
        }
    }

    Ok(SafeguardReport { warnings })
}

async fn out_of_sync(vcs: &dyn VersionControl, remote: &str, default_branch: &str) -> bool {
    let Ok(head) = vcs.rev_parse("HEAD").await else {
        return false;
    };
    let Ok(remote_tip) = vcs.fetch_remote_rev(remote, default_branch).await else {
        return false;
    };
    match vcs.merge_base(&head, &remote_tip).await {
        Ok(merge_base) => merge_base != remote_tip,
        Err(_) => false,
    }
}

fn trigger(
    warnings: &mut Vec<SafeguardWarning>,
    context: SafeguardContext,
    name: &'static str,
    message: String,
) -> Result<()> {
    match context {
        SafeguardContext::List => {
            warnings.push(SafeguardWarning { name, message });
            Ok(())
        }
        SafeguardContext::Run => Err(Error::Safeguard { name, message }),
    }
}

/// `outdated-code`: a stack's fingerprint file (written the last time its
/// marker was generated) no longer matches the marker's current content.
/// Fatal for `run` only.
pub fn check_outdated_code(
    stack_path: &ProjectPath,
    marker_text: &str,
    cached_fingerprint: Option<&str>,
) -> Result<()> {
    let current = fingerprint(marker_text);
    if let Some(cached) = cached_fingerprint {
        if cached != current {
            return Err(Error::Safeguard {
                name: "outdated-code",
                message: format!("stack {stack_path} has a stale generated-code fingerprint"),
            });
        }
    }
    Ok(())
}

pub fn fingerprint(marker_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(marker_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convention: a stack carrying generated code keeps a `generated.tmgen`
/// marker file alongside a `generated.tmgen.sha256` cache of its last-known
/// fingerprint. A stack with no marker file has nothing generated to go
/// stale, so it's skipped.
pub fn check_outdated_code_for_stack(stack_dir: &Path, stack_path: &ProjectPath) -> Result<()> {
    let marker_path = stack_dir.join("generated.tmgen");
    let Ok(marker_text) = std::fs::read_to_string(&marker_path) else {
        return Ok(());
    };
    let cached = std::fs::read_to_string(stack_dir.join("generated.tmgen.sha256")).ok();
    check_outdated_code(stack_path, &marker_text, cached.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_vcs::FakeVcs;

    #[tokio::test]
    async fn skips_git_safeguards_without_remote() {
        let mut vcs = FakeVcs::new("/repo");
        vcs.uncommitted = true;
        let toggles = SafeguardToggles::default();
        let report = check_safeguards(Some(&vcs), &toggles, None, "main", SafeguardContext::Run)
            .await
            .unwrap();
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn run_context_is_fatal_on_trigger() {
        let mut vcs = FakeVcs::new("/repo");
        vcs.uncommitted = true;
        let toggles = SafeguardToggles::default();
        let err = check_safeguards(
            Some(&vcs),
            &toggles,
            Some("origin"),
            "main",
            SafeguardContext::Run,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Safeguard { name: "git-uncommitted", .. }));
    }

    #[tokio::test]
    async fn list_context_collects_warnings_instead_of_failing() {
        let mut vcs = FakeVcs::new("/repo");
        vcs.uncommitted = true;
        let toggles = SafeguardToggles::default();
        let report = check_safeguards(
            Some(&vcs),
            &toggles,
            Some("origin"),
            "main",
            SafeguardContext::List,
        )
        .await
        .unwrap();
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn outdated_code_flags_fingerprint_mismatch() {
        let path = ProjectPath::try_new("/a").unwrap();
        let err = check_outdated_code(&path, "name \"a\"", Some("stale-hash")).unwrap_err();
        assert!(matches!(err, Error::Safeguard { name: "outdated-code", .. }));
    }

    #[test]
    fn outdated_code_passes_with_no_cached_fingerprint() {
        let path = ProjectPath::try_new("/a").unwrap();
        assert!(check_outdated_code(&path, "name \"a\"", None).is_ok());
    }

    #[test]
    fn outdated_code_for_stack_skips_stacks_without_a_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = ProjectPath::try_new("/a").unwrap();
        assert!(check_outdated_code_for_stack(dir.path(), &path).is_ok());
    }

    #[test]
    fn outdated_code_for_stack_flags_a_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("generated.tmgen"), "marker v2").unwrap();
        std::fs::write(dir.path().join("generated.tmgen.sha256"), fingerprint("marker v1")).unwrap();
        let path = ProjectPath::try_new("/a").unwrap();
        let err = check_outdated_code_for_stack(dir.path(), &path).unwrap_err();
        assert!(matches!(err, Error::Safeguard { name: "outdated-code", .. }));
    }
}
