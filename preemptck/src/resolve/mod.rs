//! Contract resolution
//!
//! Computes each routine's effective contract from its own annotation and
//! the class-level default of its enclosing type:
//!
//! 1. a routine annotation always wins (this is how a single method escapes
//!    an `uninterruptible` class, or tightens an ordinary one);
//! 2. otherwise the enclosing type's default applies;
//! 3. otherwise the routine is `interruptible`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{CheckError, Result};
use crate::facts::FactSet;
use crate::model::{Contract, Routine, RoutineId, Span, TypeName};

/// Effective contract of one routine given its annotation and type default
pub fn resolve(declared: Option<Contract>, type_default: Option<Contract>) -> Contract {
    declared.or(type_default).unwrap_or_default()
}

/// Where an effective contract came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "from", content = "type", rename_all = "kebab-case")]
pub enum ContractSource {
    /// The routine's own annotation
    Declared,
    /// Class-level default of the named type
    TypeDefault(TypeName),
    /// Nothing declared anywhere
    Default,
}

impl fmt::Display for ContractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractSource::Declared => write!(f, "declared"),
            ContractSource::TypeDefault(ty) => write!(f, "default of type `{}`", ty),
            ContractSource::Default => write!(f, "implicit default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub contract: Contract,
    pub source: ContractSource,
}

/// What carries a contradictory set of tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideSubject {
    Routine(RoutineId),
    Type(TypeName),
}

/// A routine or type declaring more than one distinct contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedOverride {
    pub subject: OverrideSubject,
    /// Distinct tags, in the order first declared
    pub tags: Vec<Contract>,
    pub span: Option<Span>,
}

impl fmt::Display for MalformedOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(|t| t.as_str()).collect();
        match &self.subject {
            OverrideSubject::Routine(id) => {
                write!(f, "routine `{}` declares conflicting contracts: {}", id, tags.join(", "))
            }
            OverrideSubject::Type(ty) => {
                write!(f, "type `{}` declares conflicting defaults: {}", ty, tags.join(", "))
            }
        }
    }
}

/// Reject facts in which a routine or a type carries contradictory tags.
///
/// Every offender is collected before failing. Repeating the same tag is
/// accepted.
pub fn validate(facts: &FactSet) -> Result<()> {
    let mut malformed = Vec::new();

    for decl in facts.types() {
        let tags = distinct(&decl.defaults);
        if tags.len() > 1 {
            malformed.push(MalformedOverride {
                subject: OverrideSubject::Type(decl.name.clone()),
                tags,
                span: decl.span,
            });
        }
    }

    for routine in facts.routines() {
        let tags = distinct(&routine.declared);
        if tags.len() > 1 {
            malformed.push(MalformedOverride {
                subject: OverrideSubject::Routine(routine.id.clone()),
                tags,
                span: routine.span,
            });
        }
    }

    if malformed.is_empty() {
        Ok(())
    } else {
        Err(CheckError::MalformedOverride(malformed))
    }
}

fn distinct(tags: &[Contract]) -> Vec<Contract> {
    let mut out: Vec<Contract> = Vec::with_capacity(tags.len());
    for &tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Resolve one routine against the fact set
pub fn resolve_routine(facts: &FactSet, routine: &Routine) -> Resolution {
    if let Some(&declared) = routine.declared.first() {
        return Resolution {
            contract: declared,
            source: ContractSource::Declared,
        };
    }

    let type_default = routine
        .enclosing_type
        .as_ref()
        .and_then(|ty| facts.type_decl(ty.as_str()))
        .and_then(|decl| decl.defaults.first().map(|&c| (decl.name.clone(), c)));

    match type_default {
        Some((ty, contract)) => Resolution {
            contract,
            source: ContractSource::TypeDefault(ty),
        },
        None => Resolution {
            contract: resolve(None, None),
            source: ContractSource::Default,
        },
    }
}

/// Effective contracts for every routine of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectiveContracts {
    map: BTreeMap<RoutineId, Resolution>,
}

impl EffectiveContracts {
    /// Effective contract of `id`; routines without facts are interruptible
    pub fn get(&self, id: &str) -> Contract {
        self.map.get(id).map(|r| r.contract).unwrap_or_default()
    }

    pub fn resolution(&self, id: &str) -> Option<&Resolution> {
        self.map.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoutineId, Contract)> {
        self.map.iter().map(|(id, r)| (id, r.contract))
    }

    pub fn resolutions(&self) -> impl Iterator<Item = (&RoutineId, &Resolution)> {
        self.map.iter()
    }

    /// Routines whose effective contract is `contract`
    pub fn with_contract(&self, contract: Contract) -> impl Iterator<Item = &RoutineId> {
        self.map
            .iter()
            .filter(move |(_, r)| r.contract == contract)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert(&mut self, id: RoutineId, resolution: Resolution) {
        self.map.insert(id, resolution);
    }
}

/// Resolve every routine mentioned by the facts.
///
/// Call targets and allocators without facts of their own resolve to the
/// implicit default.
pub fn resolve_all(facts: &FactSet) -> EffectiveContracts {
    let mut contracts = EffectiveContracts::default();
    for id in facts.referenced_ids() {
        let resolution = match facts.routine(id.as_str()) {
            Some(routine) => resolve_routine(facts, routine),
            None => Resolution {
                contract: Contract::default(),
                source: ContractSource::Default,
            },
        };
        contracts.insert(id, resolution);
    }
    contracts
}
