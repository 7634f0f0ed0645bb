//! Verification pipeline
//!
//! This module orchestrates one full run:
//!
//! ```text
//! Fact source → validate → resolve → call graph → check → policy gate → hints
//!                  ↓                                 ↓                    ↓
//!          MalformedOverride                     Violations     InternalConsistency
//! ```
//!
//! Every stage works on an immutable snapshot; nothing is carried between
//! runs unless the caller uses [`crate::verify::IncrementalChecker`].

use tracing::{debug, info, warn};

use crate::codegen::{self, HintMap};
use crate::config::{CheckConfig, ViolationPolicy};
use crate::error::{CheckError, Result};
use crate::facts::{FactSet, FactSource};
use crate::graph::CallGraph;
use crate::resolve::{self, EffectiveContracts};
use crate::verify::{ContractChecker, VerificationReport};

/// Facts after validation and resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    pub facts: FactSet,
    pub contracts: EffectiveContracts,
    pub graph: CallGraph,
}

/// Result of a run that got past the policy gate
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub contracts: EffectiveContracts,
    pub report: VerificationReport,
    pub hints: HintMap,
}

/// One verification run with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: CheckConfig,
}

impl Pipeline {
    pub fn new(config: CheckConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Load, validate and resolve the facts
    pub fn resolve(&self, source: &dyn FactSource) -> Result<Resolved> {
        self.config.validate()?;

        let facts = source.load()?;
        debug!(routines = facts.routine_count(), "loaded facts");

        resolve::validate(&facts)?;
        let contracts = resolve::resolve_all(&facts);
        let graph = CallGraph::from_facts(&facts);
        info!(
            routines = graph.len(),
            edges = graph.edge_count(),
            "resolved effective contracts"
        );

        Ok(Resolved {
            facts,
            contracts,
            graph,
        })
    }

    /// Resolve and check, applying the violation policy
    pub fn check(&self, source: &dyn FactSource) -> Result<(Resolved, VerificationReport)> {
        let resolved = self.resolve(source)?;
        let report = ContractChecker::from_config(&self.config).check_program(
            &resolved.facts,
            &resolved.graph,
            &resolved.contracts,
        );
        self.gate(&report)?;
        Ok((resolved, report))
    }

    /// Full run: check, gate, then emit codegen hints
    pub fn run(&self, source: &dyn FactSource) -> Result<PipelineOutput> {
        let (resolved, report) = self.check(source)?;
        let hints = codegen::emit(&resolved.facts, &resolved.contracts, &report)?;
        debug!(routines = hints.len(), "emitted codegen hints");
        Ok(PipelineOutput {
            contracts: resolved.contracts,
            report,
            hints,
        })
    }

    fn gate(&self, report: &VerificationReport) -> Result<()> {
        if report.passed() {
            info!("{}", report.summary());
            return Ok(());
        }

        if !self.config.policy.emits_hints_on_violation() {
            return Err(CheckError::Violations(Box::new(report.clone())));
        }
        if self.config.policy == ViolationPolicy::Allow {
            debug!(
                violations = report.violation_count(),
                "violations allowed by policy"
            );
        } else {
            for violation in &report.violations {
                warn!(code = violation.kind.code(), "{}", violation.message);
            }
            warn!("{} (continuing: policy is warn)", report.summary());
        }
        Ok(())
    }
}

/// Full run with the given configuration
pub fn run(source: &dyn FactSource, config: &CheckConfig) -> Result<PipelineOutput> {
    Pipeline::new(config.clone()).run(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contract, Routine};

    fn violating() -> FactSet {
        FactSet::new()
            .with_routine(Routine::new("heapScan").declared(Contract::Uninterruptible).calls("alloc"))
            .with_routine(Routine::new("alloc").declared(Contract::Interruptible))
    }

    #[test]
    fn test_deny_policy_fails_run() {
        let err = run(&violating(), &CheckConfig::default()).unwrap_err();
        match err {
            CheckError::Violations(report) => assert_eq!(report.violation_count(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_warn_policy_still_emits_hints() {
        let config = CheckConfig::new().policy(ViolationPolicy::Warn);
        let output = run(&violating(), &config).unwrap();
        assert_eq!(output.report.violation_count(), 1);
        assert_eq!(output.hints.len(), 2);
    }

    #[test]
    fn test_malformed_override_stops_before_checking() {
        let facts = FactSet::new().with_routine(
            Routine::new("a")
                .declared(Contract::Uninterruptible)
                .declared(Contract::Unpreemptible),
        );
        assert!(matches!(
            run(&facts, &CheckConfig::default()),
            Err(CheckError::MalformedOverride(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CheckConfig::new().threads(0);
        assert!(matches!(
            Pipeline::new(config).resolve(&FactSet::new()),
            Err(CheckError::Config { .. })
        ));
    }

    #[test]
    fn test_clean_run() {
        let facts = FactSet::new()
            .with_routine(Routine::new("poll").declared(Contract::Uninterruptible));
        let output = run(&facts, &CheckConfig::default()).unwrap();
        assert!(output.report.passed());
        assert_eq!(output.contracts.get("poll"), Contract::Uninterruptible);
    }
}
