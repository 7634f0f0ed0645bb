//! Run configuration
//!
//! `CheckConfig` controls what a verification run does with violations and
//! how the call graph is traversed. It can be filled from the `[check]`
//! table of a fact manifest or a standalone TOML file, and the CLI layers
//! its own flags on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// What a run does when the checker reports violations
///
/// # Soundness
///
/// Codegen hints built from a program with violations describe routines
/// whose `uninterruptible` promise does not hold. Only `Deny` guarantees that
/// every emitted `omit-safepoints` policy is backed by a clean check.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    /// Violations fail the run; no hints are produced
    #[default]
    Deny,
    /// Violations are reported as warnings; hints are still produced
    Warn,
    /// Violations are reported at debug level only; hints are still produced
    Allow,
}

impl ViolationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationPolicy::Deny => "deny",
            ViolationPolicy::Warn => "warn",
            ViolationPolicy::Allow => "allow",
        }
    }

    /// Whether a run with violations may still reach hint emission
    pub fn emits_hints_on_violation(&self) -> bool {
        !matches!(self, ViolationPolicy::Deny)
    }
}

/// Verification run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    /// Violation handling policy
    pub policy: ViolationPolicy,
    /// Check strongly-connected components on the rayon pool
    pub parallel: bool,
    /// Worker count for the parallel checker (`None` = rayon default)
    pub threads: Option<usize>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            policy: ViolationPolicy::Deny,
            parallel: true,
            threads: None,
        }
    }
}

impl CheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set violation policy
    pub fn policy(mut self, policy: ViolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable parallel traversal
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set worker count for parallel traversal
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Overlay the values present in a `[check]` table
    pub fn apply(mut self, section: &CheckSection) -> Self {
        if let Some(policy) = section.policy {
            self.policy = policy;
        }
        if let Some(parallel) = section.parallel {
            self.parallel = parallel;
        }
        if let Some(threads) = section.threads {
            self.threads = Some(threads);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(CheckError::config("`threads` must be at least 1"));
        }
        Ok(())
    }

    /// Load a standalone config file holding a `[check]` table
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct ConfigFile {
            #[serde(default)]
            check: CheckSection,
        }

        let file: ConfigFile =
            toml::from_str(source).map_err(|e| CheckError::config(e.message()))?;
        let config = Self::default().apply(&file.check);
        config.validate()?;
        Ok(config)
    }
}

/// The `[check]` table as written in TOML; absent keys keep their defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CheckSection {
    pub policy: Option<ViolationPolicy>,
    pub parallel: Option<bool>,
    pub threads: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sound() {
        let config = CheckConfig::default();
        assert_eq!(config.policy, ViolationPolicy::Deny);
        assert!(config.parallel);
        assert!(!config.policy.emits_hints_on_violation());
    }

    #[test]
    fn test_from_toml_overlays_defaults() {
        let config = CheckConfig::from_toml("[check]\npolicy = \"warn\"\nthreads = 4\n").unwrap();
        assert_eq!(config.policy, ViolationPolicy::Warn);
        assert_eq!(config.threads, Some(4));
        assert!(config.parallel);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(CheckConfig::from_toml("").unwrap(), CheckConfig::default());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = CheckConfig::from_toml("[check]\nthreads = 0\n").unwrap_err();
        assert!(matches!(err, CheckError::Config { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(CheckConfig::from_toml("[check]\nfail-fast = true\n").is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = CheckConfig::new()
            .policy(ViolationPolicy::Allow)
            .parallel(false)
            .threads(2);
        assert_eq!(config.policy.as_str(), "allow");
        assert!(!config.parallel);
        assert_eq!(config.threads, Some(2));
    }
}
