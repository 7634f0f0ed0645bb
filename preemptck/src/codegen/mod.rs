//! Code-generation hints
//!
//! Turns verified effective contracts into per-routine instructions for the
//! downstream code generator: whether to poll safepoints, whether voluntary
//! yield points may be inserted, whether allocation is permitted, and
//! whether exception-table based interruption paths are kept.
//!
//! `unpreemptible` suppression is routine-local: it never changes how the
//! routine's callees are compiled.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::error::{CheckError, Result};
use crate::facts::FactSet;
use crate::model::{Contract, RoutineId, Span};
use crate::resolve::EffectiveContracts;
use crate::verify::VerificationReport;

/// Safepoint and yield policy for one routine body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafepointPolicy {
    /// No safepoint polls and no yield checks anywhere in the body
    OmitSafepoints,
    /// No voluntary yield points; allocation and other involuntary
    /// preemption sources stay legal
    SuppressVoluntaryYields,
    /// Safepoints and yield checks at the normal scheduling cadence
    Normal,
}

impl SafepointPolicy {
    pub fn for_contract(contract: Contract) -> Self {
        match contract {
            Contract::Uninterruptible => SafepointPolicy::OmitSafepoints,
            Contract::Unpreemptible => SafepointPolicy::SuppressVoluntaryYields,
            Contract::Interruptible => SafepointPolicy::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SafepointPolicy::OmitSafepoints => "omit-safepoints",
            SafepointPolicy::SuppressVoluntaryYields => "suppress-voluntary-yields",
            SafepointPolicy::Normal => "normal",
        }
    }
}

/// Everything the code generator needs for one routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodegenHint {
    pub policy: SafepointPolicy,
    pub allow_allocation: bool,
    /// Keep exception-table based interruption paths
    pub exception_interruption: bool,
    /// Emit a stack map (the routine holds GC roots)
    pub emit_stack_map: bool,
}

impl CodegenHint {
    pub fn for_contract(contract: Contract) -> Self {
        let strict = contract.is_uninterruptible();
        Self {
            policy: SafepointPolicy::for_contract(contract),
            allow_allocation: !strict,
            exception_interruption: !strict,
            emit_stack_map: false,
        }
    }
}

impl fmt::Display for CodegenHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy.as_str())?;
        if !self.allow_allocation {
            f.write_str(" no-alloc")?;
        }
        if !self.exception_interruption {
            f.write_str(" no-exception-interrupt")?;
        }
        if self.emit_stack_map {
            f.write_str(" stack-map")?;
        }
        Ok(())
    }
}

/// Allocation site the checker should have rejected but did not.
///
/// Every allocation is an edge to its allocator, so a certified
/// uninterruptible routine can only allocate through an uninterruptible
/// allocator. Anything else means the checked call graph missed the edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("certified uninterruptible routine `{routine}` allocates through {contract} routine `{allocator}`; the checked call graph is missing this edge")]
pub struct InternalConsistencyError {
    pub routine: RoutineId,
    pub allocator: RoutineId,
    pub contract: Contract,
    pub span: Option<Span>,
}

/// Codegen policy per routine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HintMap {
    map: BTreeMap<RoutineId, CodegenHint>,
}

impl HintMap {
    pub fn get(&self, id: &str) -> Option<&CodegenHint> {
        self.map.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoutineId, &CodegenHint)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Display for HintMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, hint) in &self.map {
            writeln!(f, "{id}: {hint}")?;
        }
        Ok(())
    }
}

/// Policy map derived from effective contracts alone
pub fn hints(contracts: &EffectiveContracts) -> HintMap {
    HintMap {
        map: contracts
            .iter()
            .map(|(id, contract)| (id.clone(), CodegenHint::for_contract(contract)))
            .collect(),
    }
}

/// Build the policy map for a checked program.
///
/// A routine is certified uninterruptible when its effective contract is
/// `uninterruptible` and the report names it as the caller of no transitive
/// violation. An allocation site in a certified routine that reaches an
/// allocator which is not `uninterruptible` aborts emission with
/// [`CheckError::InternalConsistency`]. Uncertified uninterruptible
/// routines (only possible when the policy lets violations through) still
/// get `omit-safepoints`.
pub fn emit(
    facts: &FactSet,
    contracts: &EffectiveContracts,
    report: &VerificationReport,
) -> Result<HintMap> {
    let offending = report.offending_callers();
    let mut map = hints(contracts);
    let mut inconsistencies = Vec::new();

    for routine in facts.routines() {
        let hint = match map.map.get_mut(&routine.id) {
            Some(hint) => hint,
            None => continue,
        };
        hint.emit_stack_map = routine.gc_roots;

        if hint.policy != SafepointPolicy::OmitSafepoints {
            continue;
        }
        if offending.contains(&routine.id) {
            warn!(
                routine = %routine.id,
                "emitting omit-safepoints for an uninterruptible routine that failed verification"
            );
            continue;
        }
        inconsistencies.extend(routine.allocations.iter().filter_map(|site| {
            let contract = contracts.get(site.allocator.as_str());
            (!contract.is_uninterruptible()).then(|| InternalConsistencyError {
                routine: routine.id.clone(),
                allocator: site.allocator.clone(),
                contract,
                span: site.span,
            })
        }));
    }

    if inconsistencies.is_empty() {
        Ok(map)
    } else {
        Err(CheckError::InternalConsistency(inconsistencies))
    }
}
