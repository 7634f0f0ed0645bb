//! Verification report

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::model::{CallSite, CallTarget, Contract, Routine, RoutineId, Span};

/// Class of contract breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    /// An uninterruptible routine may reach a routine that is not
    /// uninterruptible, directly or through a virtual-dispatch candidate
    TransitiveContractViolation,
    /// A routine holding GC roots has internal linkage, so the runtime
    /// cannot find its stack maps
    InternalLinkageGcRoot,
}

impl ViolationKind {
    pub fn code(&self) -> &'static str {
        match self {
            ViolationKind::TransitiveContractViolation => "transitive-contract-violation",
            ViolationKind::InternalLinkageGcRoot => "internal-linkage-gc-root",
        }
    }
}

/// One reported breach.
///
/// The derived ordering (caller, call-site position, callee, ...) is the
/// order violations appear in a report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Violation {
    pub caller: RoutineId,
    /// Position of the call site in the caller's call list
    pub site_index: Option<usize>,
    pub callee: Option<RoutineId>,
    pub kind: ViolationKind,
    pub call_site: Option<String>,
    /// Virtual method through which `callee` was reached
    pub via: Option<RoutineId>,
    pub caller_contract: Contract,
    pub callee_contract: Option<Contract>,
    pub span: Option<Span>,
    pub message: String,
}

impl Violation {
    /// A call from `caller` that may land in a routine that is not
    /// uninterruptible
    pub fn transitive(
        caller: &RoutineId,
        caller_contract: Contract,
        site_index: usize,
        site: &CallSite,
        callee: &RoutineId,
        callee_contract: Contract,
    ) -> Self {
        let via = match &site.target {
            CallTarget::Direct(_) | CallTarget::Allocation(_) => None,
            CallTarget::Virtual { method, .. } => Some(method.clone()),
        };
        let message = match &site.target {
            CallTarget::Direct(_) => format!(
                "{} routine `{}` calls {} routine `{}` at {}",
                caller_contract, caller, callee_contract, callee, site.id
            ),
            CallTarget::Virtual { method, .. } => format!(
                "{} routine `{}` may dispatch to {} routine `{}` (override of `{}`) at {}",
                caller_contract, caller, callee_contract, callee, method, site.id
            ),
            CallTarget::Allocation(_) => format!(
                "{} routine `{}` allocates through {} routine `{}` at {}",
                caller_contract, caller, callee_contract, callee, site.id
            ),
        };
        Self {
            caller: caller.clone(),
            site_index: Some(site_index),
            callee: Some(callee.clone()),
            kind: ViolationKind::TransitiveContractViolation,
            call_site: Some(site.id.clone()),
            via,
            caller_contract,
            callee_contract: Some(callee_contract),
            span: site.span,
            message,
        }
    }

    pub fn internal_linkage_gc_root(routine: &Routine, contract: Contract) -> Self {
        Self {
            caller: routine.id.clone(),
            site_index: None,
            callee: None,
            kind: ViolationKind::InternalLinkageGcRoot,
            call_site: None,
            via: None,
            caller_contract: contract,
            callee_contract: None,
            span: routine.span,
            message: format!(
                "routine `{}` holds GC roots but has internal linkage; its stack maps cannot be found",
                routine.id
            ),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

/// Outcome of a verification run. Passes iff it holds no violations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub violations: Vec<Violation>,
    pub routines_checked: usize,
    pub edges_checked: usize,
}

impl VerificationReport {
    /// Build a report from an unordered set of findings
    pub fn new(
        violations: impl IntoIterator<Item = Violation>,
        routines_checked: usize,
        edges_checked: usize,
    ) -> Self {
        let violations: BTreeSet<Violation> = violations.into_iter().collect();
        Self {
            violations: violations.into_iter().collect(),
            routines_checked,
            edges_checked,
        }
    }

    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }

    pub fn count_of(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    /// Violations whose caller is `id`
    pub fn violations_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Violation> + 'a {
        self.violations.iter().filter(move |v| v.caller.as_str() == id)
    }

    /// Routines named as caller by at least one transitive violation
    pub fn offending_callers(&self) -> BTreeSet<&RoutineId> {
        self.violations
            .iter()
            .filter(|v| v.kind == ViolationKind::TransitiveContractViolation)
            .map(|v| &v.caller)
            .collect()
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        if self.passed() {
            format!(
                "All {} routine(s) satisfy their preemption contracts ({} call edge(s) checked).",
                self.routines_checked, self.edges_checked
            )
        } else {
            format!(
                "Checked {} routine(s), {} call edge(s): {} violation(s).",
                self.routines_checked,
                self.edges_checked,
                self.violations.len()
            )
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "{}", violation)?;
        }
        if !self.violations.is_empty() {
            writeln!(f)?;
        }
        writeln!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str, target: CallTarget) -> CallSite {
        CallSite {
            id: id.to_string(),
            span: None,
            target,
        }
    }

    #[test]
    fn test_direct_violation_message() {
        let v = Violation::transitive(
            &"heapScan".into(),
            Contract::Uninterruptible,
            0,
            &site("heapScan#0", CallTarget::Direct("alloc".into())),
            &"alloc".into(),
            Contract::Interruptible,
        );
        assert_eq!(
            v.to_string(),
            "transitive-contract-violation: uninterruptible routine `heapScan` calls interruptible routine `alloc` at heapScan#0"
        );
        assert!(v.via.is_none());
    }

    #[test]
    fn test_virtual_violation_names_method() {
        let target = CallTarget::Virtual {
            method: "Visitor.visit".into(),
            candidates: vec!["A.visit".into()],
        };
        let v = Violation::transitive(
            &"scan".into(),
            Contract::Uninterruptible,
            3,
            &site("scan#3", target),
            &"A.visit".into(),
            Contract::Unpreemptible,
        );
        assert_eq!(v.via.as_ref().map(|m| m.as_str()), Some("Visitor.visit"));
        assert!(v.message.contains("override of `Visitor.visit`"));
    }

    #[test]
    fn test_allocation_violation_message() {
        let v = Violation::transitive(
            &"heapScan".into(),
            Contract::Uninterruptible,
            1,
            &site("heapScan#alloc0", CallTarget::Allocation("gcmalloc".into())),
            &"gcmalloc".into(),
            Contract::Interruptible,
        );
        assert_eq!(
            v.to_string(),
            "transitive-contract-violation: uninterruptible routine `heapScan` allocates through interruptible routine `gcmalloc` at heapScan#alloc0"
        );
        assert!(v.via.is_none());
    }

    #[test]
    fn test_report_orders_and_deduplicates() {
        let mk = |caller: &str, index: usize, callee: &str| {
            Violation::transitive(
                &caller.into(),
                Contract::Uninterruptible,
                index,
                &site(&format!("{caller}#{index}"), CallTarget::Direct(callee.into())),
                &callee.into(),
                Contract::Interruptible,
            )
        };
        let report = VerificationReport::new(
            vec![mk("b", 0, "x"), mk("a", 10, "y"), mk("a", 2, "z"), mk("b", 0, "x")],
            3,
            4,
        );
        let order: Vec<(&str, Option<usize>)> = report
            .violations
            .iter()
            .map(|v| (v.caller.as_str(), v.site_index))
            .collect();
        assert_eq!(order, vec![("a", Some(2)), ("a", Some(10)), ("b", Some(0))]);
        assert_eq!(report.offending_callers().len(), 2);
        assert_eq!(report.violations_from("a").count(), 2);
    }

    #[test]
    fn test_passing_summary() {
        let report = VerificationReport::new(Vec::new(), 5, 7);
        assert!(report.passed());
        assert_eq!(
            report.to_string(),
            "All 5 routine(s) satisfy their preemption contracts (7 call edge(s) checked).\n"
        );
    }
}
