//! Violation checker
//!
//! Rule: an `uninterruptible` routine may only call routines that are
//! themselves `uninterruptible`. `unpreemptible` and `interruptible` callers
//! promise nothing to their own callers, so their edges are never checked.
//! Dynamically dispatched calls are checked against every override
//! candidate.
//!
//! The call graph is split into strongly connected components. Each
//! component is walked with a worklist seeded by its `uninterruptible`
//! members, so recursive and mutually recursive routines are visited once.
//! Components are disjoint, so they can be checked in parallel; findings
//! are merged into an ordered set, which makes the report independent of
//! scheduling.

use std::collections::{BTreeSet, HashSet, VecDeque};

use rayon::prelude::*;
use tracing::{debug, warn};

use super::report::{VerificationReport, Violation};
use crate::config::CheckConfig;
use crate::facts::FactSet;
use crate::graph::CallGraph;
use crate::model::Linkage;
use crate::resolve::EffectiveContracts;

/// Checks call edges against effective contracts
#[derive(Debug, Clone)]
pub struct ContractChecker {
    parallel: bool,
    threads: Option<usize>,
}

impl ContractChecker {
    pub fn new() -> Self {
        Self {
            parallel: true,
            threads: None,
        }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self {
            parallel: config.parallel,
            threads: config.threads,
        }
    }

    /// Check components on the rayon pool
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Use a dedicated pool with this many workers
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Report every call edge that breaks the uninterruptible rule
    pub fn check(&self, graph: &CallGraph, contracts: &EffectiveContracts) -> VerificationReport {
        let components: Vec<Vec<usize>> = graph
            .components()
            .into_iter()
            .filter(|component| {
                component
                    .iter()
                    .any(|&node| contracts.get(graph.id(node).as_str()).is_uninterruptible())
            })
            .collect();

        debug!(
            routines = graph.len(),
            edges = graph.edge_count(),
            components = components.len(),
            parallel = self.parallel,
            "checking components with uninterruptible members"
        );

        let found: BTreeSet<Violation> = if self.parallel && components.len() > 1 {
            self.check_parallel(graph, contracts, &components)
        } else {
            components
                .iter()
                .flat_map(|component| check_component(graph, contracts, component))
                .collect()
        };

        VerificationReport::new(found, graph.len(), graph.edge_count())
    }

    /// [`check`](Self::check) plus the per-routine fact checks
    pub fn check_program(
        &self,
        facts: &FactSet,
        graph: &CallGraph,
        contracts: &EffectiveContracts,
    ) -> VerificationReport {
        let report = self.check(graph, contracts);
        let linkage = linkage_violations(facts, contracts);
        if linkage.is_empty() {
            return report;
        }
        VerificationReport::new(
            report.violations.into_iter().chain(linkage),
            report.routines_checked,
            report.edges_checked,
        )
    }

    fn check_parallel(
        &self,
        graph: &CallGraph,
        contracts: &EffectiveContracts,
        components: &[Vec<usize>],
    ) -> BTreeSet<Violation> {
        let run = || {
            components
                .par_iter()
                .map(|component| check_component(graph, contracts, component))
                .reduce(Vec::new, |mut acc, mut part| {
                    acc.append(&mut part);
                    acc
                })
                .into_iter()
                .collect::<BTreeSet<Violation>>()
        };

        match self.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!(threads, error = %e, "could not build checker pool, using global pool");
                    run()
                }
            },
            None => run(),
        }
    }
}

impl Default for ContractChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Check one strongly connected component
fn check_component(
    graph: &CallGraph,
    contracts: &EffectiveContracts,
    component: &[usize],
) -> Vec<Violation> {
    let members: HashSet<usize> = component.iter().copied().collect();
    let mut worklist: VecDeque<usize> = component
        .iter()
        .copied()
        .filter(|&node| contracts.get(graph.id(node).as_str()).is_uninterruptible())
        .collect();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut violations = Vec::new();

    while let Some(node) = worklist.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        check_routine_into(graph, contracts, node, &mut violations, |callee| {
            // Callees outside the component belong to another worker.
            if members.contains(&callee) && !visited.contains(&callee) {
                worklist.push_back(callee);
            }
        });
    }

    violations
}

/// Violations whose caller is `node`
pub(crate) fn check_routine(
    graph: &CallGraph,
    contracts: &EffectiveContracts,
    node: usize,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_routine_into(graph, contracts, node, &mut violations, |_| {});
    violations
}

/// Check the outgoing edges of `node`, calling `on_compatible` for every
/// uninterruptible callee that is itself a graph node
fn check_routine_into(
    graph: &CallGraph,
    contracts: &EffectiveContracts,
    node: usize,
    violations: &mut Vec<Violation>,
    mut on_compatible: impl FnMut(usize),
) {
    let caller = graph.id(node);
    let caller_contract = contracts.get(caller.as_str());
    if !caller_contract.is_uninterruptible() {
        return;
    }

    for (index, site) in graph.call_sites(node).iter().enumerate() {
        for callee in site.target.candidates() {
            let callee_contract = contracts.get(callee.as_str());
            if callee_contract.is_uninterruptible() {
                if let Some(callee_node) = graph.index_of(callee.as_str()) {
                    on_compatible(callee_node);
                }
            } else {
                violations.push(Violation::transitive(
                    caller,
                    caller_contract,
                    index,
                    site,
                    callee,
                    callee_contract,
                ));
            }
        }
    }
}

/// Routines that hold GC roots but have internal linkage
pub fn linkage_violations(facts: &FactSet, contracts: &EffectiveContracts) -> Vec<Violation> {
    facts
        .routines()
        .filter(|routine| routine.gc_roots && routine.linkage == Linkage::Internal)
        .map(|routine| {
            Violation::internal_linkage_gc_root(routine, contracts.get(routine.id.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contract, Routine};
    use crate::resolve::resolve_all;
    use crate::verify::ViolationKind;

    fn run(facts: &FactSet, parallel: bool) -> VerificationReport {
        let graph = CallGraph::from_facts(facts);
        let contracts = resolve_all(facts);
        ContractChecker::new()
            .with_parallel(parallel)
            .check_program(facts, &graph, &contracts)
    }

    #[test]
    fn test_uninterruptible_calling_uninterruptible_passes() {
        let facts = FactSet::new()
            .with_routine(Routine::new("a").declared(Contract::Uninterruptible).calls("b"))
            .with_routine(Routine::new("b").declared(Contract::Uninterruptible));
        assert!(run(&facts, false).passed());
    }

    #[test]
    fn test_unpreemptible_callee_is_rejected() {
        let facts = FactSet::new()
            .with_routine(Routine::new("a").declared(Contract::Uninterruptible).calls("b"))
            .with_routine(Routine::new("b").declared(Contract::Unpreemptible));
        let report = run(&facts, false);
        assert_eq!(report.violation_count(), 1);
        assert_eq!(report.violations[0].callee_contract, Some(Contract::Unpreemptible));
    }

    #[test]
    fn test_only_uninterruptible_callers_are_constrained() {
        let facts = FactSet::new()
            .with_routine(Routine::new("lock").declared(Contract::Unpreemptible).calls("alloc"))
            .with_routine(Routine::new("plain").calls("alloc"))
            .with_routine(Routine::new("alloc"));
        assert!(run(&facts, false).passed());
    }

    #[test]
    fn test_unknown_callee_is_interruptible() {
        let facts = FactSet::new()
            .with_routine(Routine::new("a").declared(Contract::Uninterruptible).calls("extern.fn"));
        let report = run(&facts, false);
        assert_eq!(report.violation_count(), 1);
        assert_eq!(report.violations[0].callee.as_ref().unwrap().as_str(), "extern.fn");
    }

    #[test]
    fn test_self_recursion_terminates() {
        let facts = FactSet::new().with_routine(
            Routine::new("walk").declared(Contract::Uninterruptible).calls("walk"),
        );
        assert!(run(&facts, false).passed());
    }

    #[test]
    fn test_every_call_site_is_reported() {
        let facts = FactSet::new().with_routine(
            Routine::new("a")
                .declared(Contract::Uninterruptible)
                .calls("x")
                .calls("x"),
        );
        let report = run(&facts, false);
        let sites: Vec<&str> = report
            .violations
            .iter()
            .filter_map(|v| v.call_site.as_deref())
            .collect();
        assert_eq!(sites, vec!["a#0", "a#1"]);
    }

    #[test]
    fn test_linkage_violation_reported_alongside() {
        let facts = FactSet::new()
            .with_routine(
                Routine::new("scanStack")
                    .gc_roots(true)
                    .linkage(Linkage::Internal),
            )
            .with_routine(Routine::new("ok").gc_roots(true));
        let report = run(&facts, false);
        assert_eq!(report.count_of(ViolationKind::InternalLinkageGcRoot), 1);
        assert_eq!(report.violations[0].caller.as_str(), "scanStack");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut facts = FactSet::new();
        for i in 0..64 {
            let contract = if i % 3 == 0 {
                Contract::Interruptible
            } else {
                Contract::Uninterruptible
            };
            facts.insert_routine(
                Routine::new(format!("r{i}"))
                    .declared(contract)
                    .calls(format!("r{}", (i + 1) % 64))
                    .calls(format!("r{}", (i * 7) % 64)),
            );
        }
        let sequential = run(&facts, false);
        assert!(!sequential.passed());
        assert_eq!(run(&facts, true), sequential);
        let pooled = ContractChecker::new().with_threads(2).check_program(
            &facts,
            &CallGraph::from_facts(&facts),
            &resolve_all(&facts),
        );
        assert_eq!(pooled, sequential);
    }
}
