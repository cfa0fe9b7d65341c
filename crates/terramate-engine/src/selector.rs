//! Selector: produces the ordered candidate stack list from working
//! directory scope, tag filters, the change flag, the cloud status filter,
//! and `wanted_by` closures.

use std::collections::BTreeSet;

use terramate_core::{Error, ProjectPath, Result, Stack, StackStatus};
use terramate_vcs::VersionControl;

use crate::change_detector::ChangeSet;
use crate::project_index::ProjectIndex;
use crate::tag_expr::{matches_no_tags, TagExpr};

#[derive(Debug, Clone, Default)]
pub struct SelectorFlags {
    pub changed: bool,
    pub no_recursive: bool,
    pub tags: TagExpr,
    pub no_tags: Vec<String>,
    /// Stack identities (cloud IDs) permitted by a `--status` filter, when
    /// one was applied; `None` means no status filter was requested.
    pub status_allowed_ids: Option<BTreeSet<String>>,
    pub ensure_clean_repo: bool,
}

pub async fn select<'a>(
    index: &ProjectIndex<'a>,
    workdir: &ProjectPath,
    flags: &SelectorFlags,
    change_set: Option<&ChangeSet>,
    vcs: Option<&dyn VersionControl>,
) -> Result<Vec<&'a Stack>> {
    if flags.ensure_clean_repo {
        if let Some(vcs) = vcs {
            ensure_clean_repo(vcs).await?;
        }
    }

    let mut candidates: BTreeSet<ProjectPath> = if flags.no_recursive {
        match index.lookup(workdir) {
            Some(stack) => BTreeSet::from([stack.path.clone()]),
            None => BTreeSet::new(),
        }
    } else {
        index
            .list_all()
            .into_iter()
            .filter(|s| s.path.has_prefix(workdir))
            .map(|s| s.path.clone())
            .collect()
    };

    if flags.changed {
        let Some(change_set) = change_set else {
            return Err(Error::Config(
                "changed filter requested but no change set was computed".to_string(),
            ));
        };
        candidates.retain(|p| change_set.contains(p));
    }

    candidates.retain(|p| {
        let stack = index.lookup(p).expect("candidate path must be a known stack");
        flags.tags.matches(stack) && matches_no_tags(stack, &flags.no_tags)
    });

    if let Some(allowed_ids) = &flags.status_allowed_ids {
        candidates.retain(|p| {
            let stack = index.lookup(p).expect("candidate path must be a known stack");
            stack
                .id
                .as_deref()
                .is_some_and(|id| allowed_ids.iter().any(|allowed| allowed.eq_ignore_ascii_case(id)))
        });
    }

    let extended = index.add_wanted_of(candidates);

    Ok(extended
        .into_iter()
        .filter_map(|p| index.lookup(&p))
        .collect())
}

async fn ensure_clean_repo(vcs: &dyn VersionControl) -> Result<()> {
    if vcs.has_uncommitted().await.unwrap_or(false) {
        return Err(Error::Safeguard {
            name: "git-uncommitted",
            message: "working tree has uncommitted changes".to_string(),
        });
    }
    if vcs.has_untracked().await.unwrap_or(false) {
        return Err(Error::Safeguard {
            name: "git-untracked",
            message: "working tree has untracked files".to_string(),
        });
    }
    Ok(())
}

/// Look up the cloud stack status corresponding to a CLI `--status` value.
pub fn parse_status(value: &str) -> Option<StackStatus> {
    match value {
        "ok" => Some(StackStatus::Ok),
        "drifted" => Some(StackStatus::Drifted),
        "failed" => Some(StackStatus::Failed),
        "canceled" => Some(StackStatus::Canceled),
        "unknown" => Some(StackStatus::Unknown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_config::{ConfigurationTree, ProjectOptions};
    use terramate_vcs::FakeVcs;

    fn tree_with(paths: &[&str]) -> ConfigurationTree {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        for p in paths {
            tree.insert_stack(Stack::new(ProjectPath::try_new(*p).unwrap()));
        }
        tree
    }

    #[tokio::test]
    async fn no_recursive_selects_exactly_the_workdir_stack() {
        let tree = tree_with(&["/a", "/a/b"]);
        let index = ProjectIndex::new(&tree);
        let flags = SelectorFlags {
            no_recursive: true,
            ..Default::default()
        };
        let result = select(&index, &ProjectPath::try_new("/a").unwrap(), &flags, None, None)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].path.as_str(), "/a");
    }

    #[tokio::test]
    async fn recursive_selects_all_descendants() {
        let tree = tree_with(&["/a", "/a/b", "/c"]);
        let index = ProjectIndex::new(&tree);
        let flags = SelectorFlags::default();
        let result = select(&index, &ProjectPath::try_new("/a").unwrap(), &flags, None, None)
            .await
            .unwrap();
        let paths: Vec<_> = result.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/a/b"]);
    }

    #[tokio::test]
    async fn ensure_clean_repo_aborts_on_dirty_tree() {
        let tree = tree_with(&["/a"]);
        let index = ProjectIndex::new(&tree);
        let mut vcs = FakeVcs::new("/repo");
        vcs.uncommitted = true;
        let flags = SelectorFlags {
            ensure_clean_repo: true,
            ..Default::default()
        };
        let err = select(&index, &ProjectPath::root(), &flags, None, Some(&vcs))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Safeguard { .. }));
    }
}
