//! DAG Builder & Sorter: builds a precedence graph over candidate stacks
//! from implicit parent/child ordering plus explicit `before`/`after`
//! edges, then hands off to `terramate_core::Dag` for cycle detection and
//! the deterministic topological sort.

use std::collections::BTreeSet;

use terramate_core::{Dag, ProjectPath, Result, Stack};

use crate::project_index::{EdgeKind, ProjectIndex};

/// Build the DAG over exactly the candidate stacks: edges to stacks
/// outside the candidate set are dropped, since only candidates are
/// scheduled.
pub fn build_dag(index: &ProjectIndex<'_>, candidates: &[&Stack]) -> Result<Dag> {
    let candidate_paths: BTreeSet<ProjectPath> =
        candidates.iter().map(|s| s.path.clone()).collect();

    let mut dag = Dag::new();
    for path in &candidate_paths {
        dag.add_node(path.clone());
    }

    for stack in candidates {
        if let Some(parent) = nearest_ancestor_stack(index, &stack.path) {
            if candidate_paths.contains(&parent) {
                dag.add_edge(parent, stack.path.clone())?;
            }
        }

        for target in index.resolve_edges(stack, EdgeKind::Before)? {
            if candidate_paths.contains(&target) {
                dag.add_edge(stack.path.clone(), target)?;
            }
        }

        for target in index.resolve_edges(stack, EdgeKind::After)? {
            if candidate_paths.contains(&target) {
                dag.add_edge(target, stack.path.clone())?;
            }
        }
    }

    Ok(dag)
}

fn nearest_ancestor_stack(index: &ProjectIndex<'_>, path: &ProjectPath) -> Option<ProjectPath> {
    let mut candidate = path.parent()?;
    loop {
        if index.lookup(&candidate).is_some() {
            return Some(candidate);
        }
        candidate = candidate.parent()?;
    }
}

/// Sort `order`, reversing afterward (not during) when `reverse` is set, per
/// the tie-break discipline the sort already guarantees.
pub fn sorted_order(dag: &Dag, reverse: bool) -> Result<Vec<ProjectPath>> {
    let mut order = dag.topological_order()?;
    if reverse {
        order.reverse();
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_config::{ConfigurationTree, ProjectOptions};

    fn tree_and_stacks(specs: &[(&str, &[&str], &[&str])]) -> ConfigurationTree {
        let mut tree = ConfigurationTree::new(ProjectOptions::default());
        for (path, before, after) in specs {
            let mut stack = Stack::new(ProjectPath::try_new(*path).unwrap());
            stack.before = before.iter().map(|s| s.to_string()).collect();
            stack.after = after.iter().map(|s| s.to_string()).collect();
            tree.insert_stack(stack);
        }
        tree
    }

    #[test]
    fn linear_order_via_after_edges() {
        let tree = tree_and_stacks(&[
            ("/a", &[], &[]),
            ("/b", &[], &["/a"]),
            ("/c", &[], &["/b"]),
        ]);
        let index = ProjectIndex::new(&tree);
        let candidates = index.list_all();
        let dag = build_dag(&index, &candidates).unwrap();
        let order = sorted_order(&dag, false).unwrap();
        assert_eq!(
            order,
            vec![
                ProjectPath::try_new("/a").unwrap(),
                ProjectPath::try_new("/b").unwrap(),
                ProjectPath::try_new("/c").unwrap(),
            ]
        );
    }

    #[test]
    fn fan_in_breaks_ties_lexicographically() {
        let tree = tree_and_stacks(&[
            ("/x", &[], &[]),
            ("/y", &[], &[]),
            ("/z", &[], &["/x", "/y"]),
        ]);
        let index = ProjectIndex::new(&tree);
        let candidates = index.list_all();
        let dag = build_dag(&index, &candidates).unwrap();
        let order = sorted_order(&dag, false).unwrap();
        assert_eq!(
            order,
            vec![
                ProjectPath::try_new("/x").unwrap(),
                ProjectPath::try_new("/y").unwrap(),
                ProjectPath::try_new("/z").unwrap(),
            ]
        );
    }

    #[test]
    fn cycle_is_reported_with_exact_witness() {
        let tree = tree_and_stacks(&[
            ("/a", &[], &["/b"]),
            ("/b", &[], &["/c"]),
            ("/c", &[], &["/a"]),
        ]);
        let index = ProjectIndex::new(&tree);
        let candidates = index.list_all();
        let dag = build_dag(&index, &candidates).unwrap();
        let err = sorted_order(&dag, false).unwrap_err();
        match err {
            terramate_core::Error::Cycle { witness } => {
                let set: BTreeSet<_> = witness.into_iter().collect();
                assert_eq!(
                    set,
                    BTreeSet::from([
                        ProjectPath::try_new("/a").unwrap(),
                        ProjectPath::try_new("/b").unwrap(),
                        ProjectPath::try_new("/c").unwrap(),
                    ])
                );
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn reverse_flips_after_sorting() {
        let tree = tree_and_stacks(&[
            ("/a", &[], &[]),
            ("/b", &[], &["/a"]),
        ]);
        let index = ProjectIndex::new(&tree);
        let candidates = index.list_all();
        let dag = build_dag(&index, &candidates).unwrap();
        let order = sorted_order(&dag, true).unwrap();
        assert_eq!(
            order,
            vec![ProjectPath::try_new("/b").unwrap(), ProjectPath::try_new("/a").unwrap()]
        );
    }

    #[test]
    fn implicit_parent_child_edge() {
        let tree = tree_and_stacks(&[("/a", &[], &[]), ("/a/b", &[], &[])]);
        let index = ProjectIndex::new(&tree);
        let candidates = index.list_all();
        let dag = build_dag(&index, &candidates).unwrap();
        let order = sorted_order(&dag, false).unwrap();
        assert_eq!(
            order,
            vec![ProjectPath::try_new("/a").unwrap(), ProjectPath::try_new("/a/b").unwrap()]
        );
    }
}
