//! Change Detector: computes the Change Set from a VCS baseline plus the
//! module-dependency closure.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use terramate_core::{Error, ProjectPath, Result, Stack};
use terramate_vcs::{VcsError, VersionControl};

use crate::project_index::ProjectIndex;

/// Preserve the VCS error taxonomy instead of collapsing every failure into
/// `RepoNotFound`: only "not a repository" maps there, everything else
/// (command failure, timeout, unknown remote, io) becomes `VcsFailed` with
/// the underlying message intact.
fn map_vcs_err(err: VcsError) -> Error {
    match err {
        VcsError::NotARepo => Error::RepoNotFound,
        other => Error::VcsFailed(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReason(pub &'static str);

pub const STACK_FILE_CHANGED: ChangeReason = ChangeReason("stack content changed");
pub const WATCHED_FILE_CHANGED: ChangeReason = ChangeReason("watched file changed");
pub const DEPENDENT_STACK_CHANGED: ChangeReason = ChangeReason("dependent stack changed");

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    reasons: BTreeMap<ProjectPath, ChangeReason>,
}

impl ChangeSet {
    pub fn contains(&self, path: &ProjectPath) -> bool {
        self.reasons.contains_key(path)
    }

    pub fn reason(&self, path: &ProjectPath) -> Option<&ChangeReason> {
        self.reasons.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &ProjectPath> {
        self.reasons.keys()
    }

    fn insert_if_absent(&mut self, path: ProjectPath, reason: ChangeReason) {
        self.reasons.entry(path).or_insert(reason);
    }
}

/// Select the baseline revision: on the default branch at the remote tip,
/// the parent commit; otherwise the remote default branch tip; falling
/// back to the local default branch with no remote configured.
pub async fn select_baseline(
    vcs: &dyn VersionControl,
    default_remote: Option<&str>,
    default_branch: &str,
    explicit_override: Option<&str>,
) -> Result<String> {
    if let Some(base) = explicit_override {
        return Ok(base.to_string());
    }

    let Some(remote) = default_remote else {
        return vcs.rev_parse(default_branch).await.map_err(map_vcs_err);
    };

    let current_branch = vcs.current_branch().await.map_err(map_vcs_err)?;
    let head = vcs.rev_parse("HEAD").await.map_err(map_vcs_err)?;
    let remote_tip = vcs
        .fetch_remote_rev(remote, default_branch)
        .await
        .map_err(map_vcs_err)?;

    if current_branch == default_branch && head == remote_tip {
        return vcs.rev_parse("HEAD^").await.map_err(map_vcs_err);
    }

    let merge_base = vcs.merge_base(&head, &remote_tip).await.map_err(map_vcs_err)?;
    if merge_base != remote_tip {
        return Err(Error::OutdatedBase);
    }

    Ok(format!("{remote}/{default_branch}"))
}

/// Compute the Change Set between `baseline` and the working tree.
pub async fn compute_change_set(
    vcs: &dyn VersionControl,
    index: &ProjectIndex<'_>,
    baseline: &str,
) -> Result<ChangeSet> {
    let changed_files = vcs.diff_files(baseline, "HEAD").await.map_err(map_vcs_err)?;

    let mut set = ChangeSet::default();

    for file in &changed_files {
        if let Some(stack) = nearest_ancestor_stack(index, file) {
            set.insert_if_absent(stack.path.clone(), STACK_FILE_CHANGED.clone());
        }
    }

    for stack in index.list_all() {
        let watches_changed = stack.watch.iter().any(|watched| {
            changed_files
                .iter()
                .any(|f| f.to_string_lossy().ends_with(watched.as_str()))
        });
        if watches_changed {
            set.insert_if_absent(stack.path.clone(), WATCHED_FILE_CHANGED.clone());
        }
    }

    propagate_module_dependents(index, &mut set);

    Ok(set)
}

fn nearest_ancestor_stack<'a>(index: &ProjectIndex<'a>, file: &Path) -> Option<&'a Stack> {
    let file_str = format!("/{}", file.to_string_lossy());
    let file_path = ProjectPath::try_new(&file_str).ok()?;
    let mut candidate = file_path.parent()?;
    loop {
        if let Some(stack) = index.lookup(&candidate) {
            return Some(stack);
        }
        candidate = candidate.parent()?;
    }
}

/// Build the reverse module-dependency relation from local Terraform
/// `source = "<relative-path>"` declarations, then propagate "changed"
/// transitively: if `M` is changed and `S` declares a local module source
/// pointing at `M`, `S` becomes changed too.
fn propagate_module_dependents(index: &ProjectIndex<'_>, set: &mut ChangeSet) {
    let source_re = Regex::new(r#"source\s*=\s*"(\./[^"]+|\.\./[^"]+)""#).unwrap();

    // dependents[module] = stacks that declare a local module source into `module`.
    let mut dependents: BTreeMap<ProjectPath, Vec<ProjectPath>> = BTreeMap::new();
    for stack in index.list_all() {
        let main_tf = stack.path.to_host_path(Path::new("/")).join("main.tf");
        let Ok(text) = std::fs::read_to_string(&main_tf) else {
            continue;
        };
        for captures in source_re.captures_iter(&text) {
            let relative = &captures[1];
            if let Ok(target) = stack.path.join_relative(relative) {
                dependents.entry(target).or_default().push(stack.path.clone());
            }
        }
    }

    let mut frontier: Vec<ProjectPath> = set.paths().cloned().collect();
    while let Some(changed) = frontier.pop() {
        if let Some(deps) = dependents.get(&changed) {
            for dependent in deps.clone() {
                if !set.contains(&dependent) {
                    set.insert_if_absent(dependent.clone(), DEPENDENT_STACK_CHANGED.clone());
                    frontier.push(dependent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_config::ConfigurationTree;
    use terramate_vcs::FakeVcs;

    fn tree_with(paths: &[&str]) -> ConfigurationTree {
        let mut tree = ConfigurationTree::new(terramate_config::ProjectOptions::default());
        for p in paths {
            tree.insert_stack(Stack::new(ProjectPath::try_new(*p).unwrap()));
        }
        tree
    }

    #[tokio::test]
    async fn marks_nearest_ancestor_stack_as_changed() {
        let tree = tree_with(&["/a", "/a/nested"]);
        let index = ProjectIndex::new(&tree);
        let mut vcs = FakeVcs::new("/repo");
        vcs.diffs.insert(
            ("base".to_string(), "HEAD".to_string()),
            vec!["a/nested/main.tf".into()],
        );
        let set = compute_change_set(&vcs, &index, "base").await.unwrap();
        assert!(set.contains(&ProjectPath::try_new("/a/nested").unwrap()));
        assert!(!set.contains(&ProjectPath::try_new("/a").unwrap()));
    }

    #[tokio::test]
    async fn baseline_falls_back_to_local_branch_without_remote() {
        let mut vcs = FakeVcs::new("/repo");
        vcs.revs.insert("main".to_string(), "deadbeef".to_string());
        let baseline = select_baseline(&vcs, None, "main", None).await.unwrap();
        assert_eq!(baseline, "deadbeef");
    }

    #[tokio::test]
    async fn explicit_override_always_wins() {
        let vcs = FakeVcs::new("/repo");
        let baseline = select_baseline(&vcs, Some("origin"), "main", Some("abc123"))
            .await
            .unwrap();
        assert_eq!(baseline, "abc123");
    }

    #[tokio::test]
    async fn outdated_base_is_reported_when_head_diverges() {
        let mut vcs = FakeVcs::new("/repo");
        vcs.current_branch = "feature".to_string();
        vcs.revs.insert("HEAD".to_string(), "local-head".to_string());
        vcs.remotes = vec!["origin".to_string()];
        vcs.remote_revs.insert(
            ("origin".to_string(), "main".to_string()),
            "remote-tip".to_string(),
        );
        vcs.merge_bases.insert(
            ("local-head".to_string(), "remote-tip".to_string()),
            "some-other-commit".to_string(),
        );
        let err = select_baseline(&vcs, Some("origin"), "main", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutdatedBase));
    }
}
