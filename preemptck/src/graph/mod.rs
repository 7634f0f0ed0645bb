//! Call graph
//!
//! Dense, index-based view of the call relation supplied by the fact
//! source. Every routine that is mentioned anywhere (including call targets
//! that have no facts of their own) gets a node. Virtual calls contribute an
//! edge to each of their override candidates, and every allocation site is
//! an edge to its allocator.

mod scc;

use std::collections::HashMap;

use crate::facts::FactSet;
use crate::model::{CallSite, RoutineId};

pub use scc::strongly_connected_components;

/// Immutable call graph snapshot for one verification run
#[derive(Debug, Clone)]
pub struct CallGraph {
    /// Node identities, sorted
    nodes: Vec<RoutineId>,
    index: HashMap<RoutineId, usize>,
    /// Call sites per node: calls in declaration order, then allocations
    sites: Vec<Vec<CallSite>>,
    /// Distinct successors per node, sorted
    succ: Vec<Vec<usize>>,
    /// Distinct predecessors per node, sorted
    pred: Vec<Vec<usize>>,
}

impl CallGraph {
    /// Build the graph for a fact set
    pub fn from_facts(facts: &FactSet) -> Self {
        let nodes: Vec<RoutineId> = facts.referenced_ids().into_iter().collect();
        let index: HashMap<RoutineId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut sites = vec![Vec::new(); nodes.len()];
        let mut succ = vec![Vec::new(); nodes.len()];
        let mut pred = vec![Vec::new(); nodes.len()];

        for routine in facts.routines() {
            let caller = index[&routine.id];
            let routine_sites = routine.call_sites();
            for site in &routine_sites {
                for callee in site.target.candidates() {
                    let callee = index[callee];
                    succ[caller].push(callee);
                    pred[callee].push(caller);
                }
            }
            sites[caller] = routine_sites;
        }

        for list in succ.iter_mut().chain(pred.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        Self {
            nodes,
            index,
            sites,
            succ,
            pred,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All routine identities, sorted
    pub fn routines(&self) -> &[RoutineId] {
        &self.nodes
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, node: usize) -> &RoutineId {
        &self.nodes[node]
    }

    pub fn call_sites(&self, node: usize) -> &[CallSite] {
        &self.sites[node]
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        &self.succ[node]
    }

    pub fn predecessors(&self, node: usize) -> &[usize] {
        &self.pred[node]
    }

    /// Routines with at least one call site reaching `id`
    pub fn callers_of(&self, id: &str) -> impl Iterator<Item = &RoutineId> {
        self.index_of(id)
            .map(|node| self.pred[node].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&caller| &self.nodes[caller])
    }

    /// Number of (call site, candidate) edges
    pub fn edge_count(&self) -> usize {
        self.sites
            .iter()
            .flatten()
            .map(|site| site.target.candidates().len())
            .sum()
    }

    /// Strongly connected components, callees before callers
    pub fn components(&self) -> Vec<Vec<usize>> {
        strongly_connected_components(&self.succ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Routine;

    fn sample() -> CallGraph {
        let facts = FactSet::new()
            .with_routine(Routine::new("a").calls("b").calls("b"))
            .with_routine(Routine::new("b").calls_virtual("V.m", ["c", "a"]))
            .with_routine(Routine::new("d"));
        CallGraph::from_facts(&facts)
    }

    #[test]
    fn test_nodes_include_targets_without_facts() {
        let graph = sample();
        let ids: Vec<&str> = graph.routines().iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_edges_are_deduplicated_but_counted_per_site() {
        let graph = sample();
        let a = graph.index_of("a").unwrap();
        assert_eq!(graph.successors(a), &[graph.index_of("b").unwrap()]);
        assert_eq!(graph.call_sites(a).len(), 2);
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_allocation_sites_are_edges() {
        let facts = FactSet::new().with_routine(Routine::new("scan").allocates("alloc"));
        let graph = CallGraph::from_facts(&facts);
        let scan = graph.index_of("scan").unwrap();
        assert_eq!(graph.successors(scan), &[graph.index_of("alloc").unwrap()]);
        assert_eq!(graph.call_sites(scan)[0].id, "scan#alloc0");
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_callers_of() {
        let graph = sample();
        let callers: Vec<&str> = graph.callers_of("a").map(|id| id.as_str()).collect();
        assert_eq!(callers, vec!["b"]);
        assert_eq!(graph.callers_of("missing").count(), 0);
    }

    #[test]
    fn test_components_group_recursion() {
        let graph = sample();
        let named: Vec<Vec<&str>> = graph
            .components()
            .into_iter()
            .map(|c| c.into_iter().map(|n| graph.id(n).as_str()).collect())
            .collect();
        assert_eq!(named, vec![vec!["c"], vec!["a", "b"], vec!["d"]]);
    }
}
