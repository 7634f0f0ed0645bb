//! Incremental checking
//!
//! Re-checks only the routines a change can affect and reuses the cached
//! findings of every other routine. Every violation is a property of its
//! caller's outgoing edges, so a routine needs re-checking when
//!
//! 1. its own contract, call list, linkage facts or location changed, or
//! 2. the effective contract of one of its callees changed.
//!
//! The report is always identical to a from-scratch check.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use tracing::debug;

use super::checker::{ContractChecker, check_routine, linkage_violations};
use super::report::{VerificationReport, Violation};
use crate::facts::FactSet;
use crate::graph::CallGraph;
use crate::model::{Contract, Linkage, RoutineId, Span};
use crate::resolve::EffectiveContracts;

/// What the checker needs to know about a routine to decide reuse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineSummary {
    pub contract: Contract,
    /// Hash of the call sites (ids, locations and targets)
    pub calls_hash: u64,
    pub gc_roots: bool,
    pub linkage: Linkage,
    /// Location of the routine itself, carried by per-routine findings
    pub span: Option<Span>,
}

impl RoutineSummary {
    fn extract(facts: &FactSet, graph: &CallGraph, contracts: &EffectiveContracts, node: usize) -> Self {
        let id = graph.id(node);
        let mut hasher = DefaultHasher::new();
        graph.call_sites(node).hash(&mut hasher);
        let routine = facts.routine(id.as_str());
        Self {
            contract: contracts.get(id.as_str()),
            calls_hash: hasher.finish(),
            gc_roots: routine.is_some_and(|r| r.gc_roots),
            linkage: routine.map(|r| r.linkage).unwrap_or_default(),
            span: routine.and_then(|r| r.span),
        }
    }
}

/// Summary comparison result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryChange {
    Unchanged,
    /// Effective contract changed: re-check the routine and all its callers
    ContractChanged,
    /// Call list, linkage facts or location changed: re-check only the routine
    BodyChanged,
    Added,
    Removed,
}

pub fn compare_summaries(old: Option<&RoutineSummary>, new: Option<&RoutineSummary>) -> SummaryChange {
    match (old, new) {
        (None, None) => SummaryChange::Unchanged,
        (None, Some(_)) => SummaryChange::Added,
        (Some(_), None) => SummaryChange::Removed,
        (Some(old), Some(new)) => {
            if old.contract != new.contract {
                SummaryChange::ContractChanged
            } else if old != new {
                SummaryChange::BodyChanged
            } else {
                SummaryChange::Unchanged
            }
        }
    }
}

/// Result of an incremental check
#[derive(Debug)]
pub struct IncrementalCheckResult {
    pub report: VerificationReport,
    /// Routines whose edges were checked again
    pub rechecked: Vec<RoutineId>,
    /// Routines whose cached findings were reused
    pub reused: Vec<RoutineId>,
}

/// Incremental check manager
#[derive(Debug, Default)]
pub struct IncrementalChecker {
    checker: ContractChecker,
    summaries: HashMap<RoutineId, RoutineSummary>,
    /// Cached findings keyed by caller
    findings: BTreeMap<RoutineId, Vec<Violation>>,
}

impl IncrementalChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a new snapshot of the program, reusing what the previous
    /// snapshot proved
    pub fn check(
        &mut self,
        facts: &FactSet,
        graph: &CallGraph,
        contracts: &EffectiveContracts,
    ) -> IncrementalCheckResult {
        let new_summaries: HashMap<RoutineId, RoutineSummary> = (0..graph.len())
            .map(|node| {
                (
                    graph.id(node).clone(),
                    RoutineSummary::extract(facts, graph, contracts, node),
                )
            })
            .collect();

        if self.summaries.is_empty() {
            return self.check_from_scratch(facts, graph, contracts, new_summaries);
        }

        let mut dirty: BTreeSet<usize> = BTreeSet::new();
        for node in 0..graph.len() {
            let id = graph.id(node);
            match compare_summaries(self.summaries.get(id), new_summaries.get(id)) {
                SummaryChange::Unchanged | SummaryChange::Removed => {}
                SummaryChange::ContractChanged => {
                    dirty.insert(node);
                    dirty.extend(graph.predecessors(node).iter().copied());
                }
                SummaryChange::BodyChanged | SummaryChange::Added => {
                    dirty.insert(node);
                }
            }
        }

        self.findings.retain(|id, _| new_summaries.contains_key(id));

        let linkage: HashMap<RoutineId, Vec<Violation>> = linkage_violations(facts, contracts)
            .into_iter()
            .fold(HashMap::new(), |mut acc, v| {
                acc.entry(v.caller.clone()).or_default().push(v);
                acc
            });

        let mut rechecked = Vec::new();
        for &node in &dirty {
            let id = graph.id(node);
            let mut found = check_routine(graph, contracts, node);
            if let Some(extra) = linkage.get(id) {
                found.extend(extra.iter().cloned());
            }
            if found.is_empty() {
                self.findings.remove(id);
            } else {
                self.findings.insert(id.clone(), found);
            }
            rechecked.push(id.clone());
        }

        let reused: Vec<RoutineId> = (0..graph.len())
            .filter(|node| !dirty.contains(node))
            .map(|node| graph.id(node).clone())
            .collect();

        debug!(
            rechecked = rechecked.len(),
            reused = reused.len(),
            "incremental preemption check"
        );

        self.summaries = new_summaries;
        IncrementalCheckResult {
            report: self.current_report(graph),
            rechecked,
            reused,
        }
    }

    fn check_from_scratch(
        &mut self,
        facts: &FactSet,
        graph: &CallGraph,
        contracts: &EffectiveContracts,
        summaries: HashMap<RoutineId, RoutineSummary>,
    ) -> IncrementalCheckResult {
        let report = self.checker.check_program(facts, graph, contracts);
        self.findings.clear();
        for violation in &report.violations {
            self.findings
                .entry(violation.caller.clone())
                .or_default()
                .push(violation.clone());
        }
        self.summaries = summaries;
        IncrementalCheckResult {
            report,
            rechecked: graph.routines().to_vec(),
            reused: Vec::new(),
        }
    }

    fn current_report(&self, graph: &CallGraph) -> VerificationReport {
        VerificationReport::new(
            self.findings.values().flatten().cloned(),
            graph.len(),
            graph.edge_count(),
        )
    }

    pub fn summaries(&self) -> &HashMap<RoutineId, RoutineSummary> {
        &self.summaries
    }

    /// Forget everything; the next check runs from scratch
    pub fn clear(&mut self) {
        self.summaries.clear();
        self.findings.clear();
    }
}
