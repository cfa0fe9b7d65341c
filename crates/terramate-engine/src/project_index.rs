//! Project Index: a read-only view over a loaded `ConfigurationTree`,
//! exposing the lookups every downstream component needs.

use std::collections::BTreeSet;

use glob::Pattern;
use terramate_config::ConfigurationTree;
use terramate_core::{Error, ProjectPath, Result, Stack};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Before,
    After,
}

pub struct ProjectIndex<'a> {
    tree: &'a ConfigurationTree,
}

impl<'a> ProjectIndex<'a> {
    pub fn new(tree: &'a ConfigurationTree) -> Self {
        Self { tree }
    }

    /// Every stack, in lexicographic order of project path.
    pub fn list_all(&self) -> Vec<&'a Stack> {
        self.tree.stacks().collect()
    }

    pub fn lookup(&self, path: &ProjectPath) -> Option<&'a Stack> {
        self.tree.lookup(path)
    }

    /// `path` itself (if a stack) plus every descendant stack.
    pub fn subtree(&self, path: &ProjectPath) -> Vec<&'a Stack> {
        self.tree
            .stacks()
            .filter(|s| s.path.has_prefix(path))
            .collect()
    }

    /// Resolve a stack's `before`/`after` tokens to existing stacks.
    ///
    /// Tokens are one of: an absolute project path, a path relative to the
    /// declaring stack's directory, or a glob pattern matched against every
    /// project path in the index. Unresolved tokens are dropped with a
    /// warning. Self-references are rejected outright. Resolution always
    /// expands glob tokens against the full index, then intersects with
    /// what is reachable from the declaring stack — never against a
    /// narrower candidate list.
    pub fn resolve_edges(&self, stack: &Stack, kind: EdgeKind) -> Result<Vec<ProjectPath>> {
        let tokens: &[String] = match kind {
            EdgeKind::Before => &stack.before,
            EdgeKind::After => &stack.after,
        };

        let mut resolved: BTreeSet<ProjectPath> = BTreeSet::new();
        for token in tokens {
            if token.contains('*') || token.contains('?') || token.contains('[') {
                let matches = self.resolve_glob(stack, token)?;
                resolved.extend(matches);
                continue;
            }

            let candidate = if token.starts_with('/') {
                ProjectPath::try_new(token)
            } else {
                stack.path.join_relative(token)
            };

            match candidate {
                Ok(target) => {
                    if target == stack.path {
                        return Err(Error::Cycle {
                            witness: vec![stack.path.clone()],
                        });
                    }
                    if self.tree.lookup(&target).is_some() {
                        resolved.insert(target);
                    } else {
                        warn!(stack = %stack.path, token = %token, "dropping edge to unknown stack");
                    }
                }
                Err(_) => warn!(stack = %stack.path, token = %token, "dropping malformed edge token"),
            }
        }

        Ok(resolved.into_iter().collect())
    }

    fn resolve_glob(&self, stack: &Stack, token: &str) -> Result<Vec<ProjectPath>> {
        let absolute = if token.starts_with('/') {
            token.to_string()
        } else {
            format!("{}/{}", stack.path.as_str().trim_end_matches('/'), token)
        };

        let pattern = Pattern::new(&absolute).map_err(|e| {
            Error::Config(format!("invalid glob pattern `{absolute}` in stack {}: {e}", stack.path))
        })?;

        let mut matches = Vec::new();
        for candidate in self.tree.stacks() {
            if candidate.path == stack.path {
                continue;
            }
            if pattern.matches(candidate.path.as_str()) {
                matches.push(candidate.path.clone());
            }
        }
        Ok(matches)
    }

    /// Extend `seed` with every stack that is `wanted_by` any stack already
    /// in `seed`, to a fixed point.
    pub fn add_wanted_of(&self, seed: BTreeSet<ProjectPath>) -> BTreeSet<ProjectPath> {
        let mut current = seed;
        loop {
            let mut next = current.clone();
            for stack in self.tree.stacks() {
                if current.contains(&stack.path) {
                    continue;
                }
                let wants_any = stack.wanted_by.iter().any(|token| {
                    let resolved = if token.starts_with('/') {
                        ProjectPath::try_new(token).ok()
                    } else {
                        stack.path.join_relative(token).ok()
                    };
                    resolved.is_some_and(|p| current.contains(&p))
                });
                if wants_any {
                    next.insert(stack.path.clone());
                }
            }
            if next.len() == current.len() {
                return next;
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_config::ProjectOptions;

    fn stack(path: &str) -> Stack {
        Stack::new(ProjectPath::try_new(path).unwrap())
    }

    #[test]
    fn list_all_is_lexicographic() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        tree.insert_stack(stack("/b"));
        tree.insert_stack(stack("/a"));
        let index = ProjectIndex::new(&tree);
        let paths: Vec<_> = index.list_all().iter().map(|s| s.path.as_str().to_string()).collect();
        assert_eq!(paths, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn resolve_edges_drops_unknown_targets() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        let mut a = stack("/a");
        a.after = vec!["/nonexistent".to_string()];
        tree.insert_stack(a.clone());
        let index = ProjectIndex::new(&tree);
        let resolved = index.resolve_edges(&a, EdgeKind::After).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn resolve_edges_rejects_self_reference() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        let mut a = stack("/a");
        a.before = vec!["/a".to_string()];
        tree.insert_stack(a.clone());
        let index = ProjectIndex::new(&tree);
        assert!(index.resolve_edges(&a, EdgeKind::Before).is_err());
    }

    #[test]
    fn resolve_edges_expands_glob_against_full_index() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        let mut a = stack("/a");
        a.after = vec!["/net/*".to_string()];
        tree.insert_stack(a.clone());
        tree.insert_stack(stack("/net/vpc"));
        tree.insert_stack(stack("/net/subnet"));
        let index = ProjectIndex::new(&tree);
        let mut resolved = index.resolve_edges(&a, EdgeKind::After).unwrap();
        resolved.sort();
        assert_eq!(
            resolved,
            vec![
                ProjectPath::try_new("/net/subnet").unwrap(),
                ProjectPath::try_new("/net/vpc").unwrap()
            ]
        );
    }

    #[test]
    fn add_wanted_of_reaches_fixed_point() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        tree.insert_stack(stack("/a"));
        let mut b = stack("/b");
        b.wanted_by = vec!["/a".to_string()];
        tree.insert_stack(b);
        let mut c = stack("/c");
        c.wanted_by = vec!["/b".to_string()];
        tree.insert_stack(c);
        let index = ProjectIndex::new(&tree);
        let seed = BTreeSet::from([ProjectPath::try_new("/a").unwrap()]);
        let extended = index.add_wanted_of(seed);
        assert_eq!(
            extended,
            BTreeSet::from([
                ProjectPath::try_new("/a").unwrap(),
                ProjectPath::try_new("/b").unwrap(),
                ProjectPath::try_new("/c").unwrap(),
            ])
        );
    }
}
