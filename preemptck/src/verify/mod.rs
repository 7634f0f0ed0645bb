//! Contract verification
//!
//! Proves that no `uninterruptible` routine can reach a routine that may
//! trigger GC or yield.
//!
//! - `checker`: SCC-partitioned edge checker
//! - `report`: violations and the verification report
//! - `incremental`: re-check only what a change can affect

mod checker;
pub mod incremental;
mod report;

pub use checker::{ContractChecker, linkage_violations};
pub use incremental::{IncrementalCheckResult, IncrementalChecker, RoutineSummary, SummaryChange};
pub use report::{VerificationReport, Violation, ViolationKind};

use crate::graph::CallGraph;
use crate::resolve::EffectiveContracts;

/// Check a call graph with the default (parallel) checker
pub fn check(graph: &CallGraph, contracts: &EffectiveContracts) -> VerificationReport {
    ContractChecker::new().check(graph, contracts)
}
