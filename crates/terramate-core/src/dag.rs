//! The DAG data structure: nodes keyed by project path, edges
//! directed "must-run-before". Building one from stacks and `before`/`after`
//! declarations is the DAG Builder's job (terramate-engine); this type only
//! holds the graph and the generic algorithms over it (topological order,
//! ancestor sets, cycle detection).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::path::ProjectPath;

#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: BTreeSet<ProjectPath>,
    /// from -> set of to, meaning "from must run before to".
    edges: BTreeMap<ProjectPath, BTreeSet<ProjectPath>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ProjectPath) {
        self.nodes.insert(node.clone());
        self.edges.entry(node).or_default();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProjectPath> {
        self.nodes.iter()
    }

    /// Add a must-run-before edge. Idempotent on duplicates; a self-edge is
    /// a cycle and returns `ErrCycle` immediately rather than being stored.
    pub fn add_edge(&mut self, from: ProjectPath, to: ProjectPath) -> Result<()> {
        if from == to {
            return Err(Error::Cycle {
                witness: vec![from],
            });
        }
        self.add_node(from.clone());
        self.add_node(to.clone());
        self.edges.entry(from).or_default().insert(to);
        Ok(())
    }

    pub fn direct_successors(&self, node: &ProjectPath) -> impl Iterator<Item = &ProjectPath> {
        self.edges.get(node).into_iter().flatten()
    }

    /// All transitive predecessors of `node` (nodes that must run before it,
    /// directly or through a chain).
    pub fn ancestors(&self, node: &ProjectPath) -> BTreeSet<ProjectPath> {
        let mut predecessors: BTreeMap<&ProjectPath, Vec<&ProjectPath>> = BTreeMap::new();
        for (from, tos) in &self.edges {
            for to in tos {
                predecessors.entry(to).or_default().push(from);
            }
        }

        let mut visited = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(preds) = predecessors.get(current) {
                for pred in preds {
                    if visited.insert((*pred).clone()) {
                        stack.push(pred);
                    }
                }
            }
        }
        visited
    }

    /// All transitive successors of `node` — used for `reverse` mode, where
    /// admission is gated on descendants instead of ancestors.
    pub fn descendants(&self, node: &ProjectPath) -> BTreeSet<ProjectPath> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for next in self.direct_successors(current) {
                if visited.insert(next.clone()) {
                    stack.push(next);
                }
            }
        }
        visited
    }

    /// Kahn's algorithm with lexicographic tie-break: among nodes with
    /// in-degree zero, always emit the smallest project path next. An empty
    /// graph yields an empty order, not an error.
    pub fn topological_order(&self) -> Result<Vec<ProjectPath>> {
        let mut indegree: BTreeMap<ProjectPath, usize> =
            self.nodes.iter().map(|n| (n.clone(), 0)).collect();
        for tos in self.edges.values() {
            for to in tos {
                *indegree.get_mut(to).expect("edge target must be a node") += 1;
            }
        }

        let mut ready: BTreeSet<ProjectPath> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| node.clone())
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.iter().next().cloned() {
            ready.remove(&next);
            order.push(next.clone());
            for successor in self.direct_successors(&next) {
                let degree = indegree
                    .get_mut(successor)
                    .expect("successor must be a node");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(successor.clone());
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: BTreeSet<ProjectPath> = self
                .nodes
                .iter()
                .filter(|n| !order.contains(n))
                .cloned()
                .collect();
            return Err(Error::Cycle {
                witness: self.find_cycle_witness(&remaining),
            });
        }

        Ok(order)
    }

    /// Find one cycle among `remaining` nodes (all of which have nonzero
    /// residual in-degree once the acyclic prefix has been removed).
    fn find_cycle_witness(&self, remaining: &BTreeSet<ProjectPath>) -> Vec<ProjectPath> {
        let mut visiting: Vec<ProjectPath> = Vec::new();
        let mut on_stack: BTreeSet<ProjectPath> = BTreeSet::new();
        let mut done: BTreeSet<ProjectPath> = BTreeSet::new();

        for start in remaining {
            if done.contains(start) {
                continue;
            }
            if let Some(cycle) = Self::dfs_find_cycle(
                self,
                start,
                remaining,
                &mut visiting,
                &mut on_stack,
                &mut done,
            ) {
                return cycle;
            }
        }
        // Every remaining node has in-degree > 0 among other remaining
        // nodes, so a cycle always exists; this is unreachable in practice.
        remaining.iter().cloned().collect()
    }

    fn dfs_find_cycle(
        &self,
        node: &ProjectPath,
        remaining: &BTreeSet<ProjectPath>,
        visiting: &mut Vec<ProjectPath>,
        on_stack: &mut BTreeSet<ProjectPath>,
        done: &mut BTreeSet<ProjectPath>,
    ) -> Option<Vec<ProjectPath>> {
        visiting.push(node.clone());
        on_stack.insert(node.clone());

        for next in self.direct_successors(node) {
            if !remaining.contains(next) {
                continue;
            }
            if on_stack.contains(next) {
                let start = visiting.iter().position(|n| n == next).unwrap();
                return Some(visiting[start..].to_vec());
            }
            if !done.contains(next) {
                if let Some(cycle) =
                    self.dfs_find_cycle(next, remaining, visiting, on_stack, done)
                {
                    return Some(cycle);
                }
            }
        }

        visiting.pop();
        on_stack.remove(node);
        done.insert(node.clone());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ProjectPath {
        ProjectPath::try_new(s).unwrap()
    }

    #[test]
    fn empty_dag_sorts_to_empty_order() {
        let dag = Dag::new();
        assert_eq!(dag.topological_order().unwrap(), Vec::new());
    }

    #[test]
    fn linear_order() {
        let mut dag = Dag::new();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        dag.add_edge(p("/b"), p("/c")).unwrap();
        let order = dag.topological_order().unwrap();
        assert_eq!(order, vec![p("/a"), p("/b"), p("/c")]);
    }

    #[test]
    fn fan_in_breaks_ties_lexicographically() {
        let mut dag = Dag::new();
        dag.add_node(p("/x"));
        dag.add_node(p("/y"));
        dag.add_edge(p("/x"), p("/z")).unwrap();
        dag.add_edge(p("/y"), p("/z")).unwrap();
        let order = dag.topological_order().unwrap();
        assert_eq!(order, vec![p("/x"), p("/y"), p("/z")]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut dag = Dag::new();
        let err = dag.add_edge(p("/a"), p("/a")).unwrap_err();
        assert!(matches!(err, Error::Cycle { witness } if witness == vec![p("/a")]));
    }

    #[test]
    fn three_cycle_reports_exact_witness() {
        let mut dag = Dag::new();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        dag.add_edge(p("/b"), p("/c")).unwrap();
        dag.add_edge(p("/c"), p("/a")).unwrap();
        let err = dag.topological_order().unwrap_err();
        match err {
            Error::Cycle { witness } => {
                let set: BTreeSet<_> = witness.into_iter().collect();
                assert_eq!(set, BTreeSet::from([p("/a"), p("/b"), p("/c")]));
            }
            _ => panic!("expected cycle error"),
        }
    }

    #[test]
    fn ancestors_are_transitive() {
        let mut dag = Dag::new();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        dag.add_edge(p("/b"), p("/c")).unwrap();
        let ancestors = dag.ancestors(&p("/c"));
        assert_eq!(ancestors, BTreeSet::from([p("/a"), p("/b")]));
    }

    #[test]
    fn idempotent_duplicate_edges() {
        let mut dag = Dag::new();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        assert_eq!(dag.direct_successors(&p("/a")).count(), 1);
    }

    #[test]
    fn resorting_a_sorted_dag_is_stable() {
        let mut dag = Dag::new();
        dag.add_edge(p("/a"), p("/b")).unwrap();
        dag.add_edge(p("/b"), p("/c")).unwrap();
        let first = dag.topological_order().unwrap();

        let mut rebuilt = Dag::new();
        for (i, node) in first.iter().enumerate() {
            rebuilt.add_node(node.clone());
            if i > 0 {
                rebuilt.add_edge(first[i - 1].clone(), node.clone()).unwrap();
            }
        }
        assert_eq!(rebuilt.topological_order().unwrap(), first);
    }
}
