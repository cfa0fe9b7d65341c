//! Configuration Tree: a tree keyed by project path, loaded once and
//! treated as read-only by the core.

use std::collections::BTreeMap;

use terramate_core::{ProjectPath, Stack};

use crate::options::ProjectOptions;

#[derive(Debug, Clone)]
pub struct ConfigurationTree {
    /// Every known directory node, stack or not. A node being present with
    /// `None` means "this directory exists but is not a stack".
    nodes: BTreeMap<ProjectPath, Option<Stack>>,
    options: ProjectOptions,
}

impl ConfigurationTree {
    pub fn new(options: ProjectOptions) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ProjectPath::root(), None);
        Self { nodes, options }
    }

    pub fn options(&self) -> &ProjectOptions {
        &self.options
    }

    pub fn insert_directory(&mut self, path: ProjectPath) {
        self.nodes.entry(path).or_insert(None);
    }

    pub fn insert_stack(&mut self, stack: Stack) {
        self.nodes.insert(stack.path.clone(), Some(stack));
    }

    pub fn node_exists(&self, path: &ProjectPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn lookup(&self, path: &ProjectPath) -> Option<&Stack> {
        self.nodes.get(path).and_then(|n| n.as_ref())
    }

    /// Every stack in the tree, in insertion order (callers needing
    /// lexicographic order should sort by path — `BTreeMap` already keys
    /// by `ProjectPath`'s `Ord`, so this iterates sorted).
    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.nodes.values().filter_map(|n| n.as_ref())
    }

    /// Direct children of `path`, addressable by last path segment.
    pub fn children(&self, path: &ProjectPath) -> Vec<ProjectPath> {
        self.nodes
            .keys()
            .filter(|candidate| {
                candidate.is_descendant_of(path)
                    && candidate.parent().as_ref() == Some(path)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stacks_come_out_in_lexicographic_order() {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        tree.insert_stack(Stack::new(ProjectPath::try_new("/b").unwrap()));
        tree.insert_stack(Stack::new(ProjectPath::try_new("/a").unwrap()));
        let paths: Vec<_> = tree.stacks().map(|s| s.path.as_str().to_string()).collect();
        assert_eq!(paths, vec!["/a".to_string(), "/b".to_string()]);
    }
}
