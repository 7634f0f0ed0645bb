//! Fact source
//!
//! The verifier never reads annotations itself. A front end hands it a
//! [`FactSet`]: declared contract tags per routine, class-level defaults per
//! type, call sites (with virtual calls already expanded to their override
//! candidates), allocation sites and linkage facts.

pub mod manifest;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::model::{Routine, RoutineId, TypeDecl, TypeName};

pub use manifest::Manifest;

/// Anything that can produce the raw facts for one verification run
pub trait FactSource {
    fn load(&self) -> Result<FactSet>;
}

/// Raw, unresolved facts keyed by routine and type identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSet {
    routines: BTreeMap<RoutineId, Routine>,
    types: BTreeMap<TypeName, TypeDecl>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routine(mut self, routine: Routine) -> Self {
        self.insert_routine(routine);
        self
    }

    pub fn with_type(mut self, decl: TypeDecl) -> Self {
        self.insert_type(decl);
        self
    }

    /// Insert a routine, returning the one it replaced
    pub fn insert_routine(&mut self, routine: Routine) -> Option<Routine> {
        self.routines.insert(routine.id.clone(), routine)
    }

    /// Insert a type, returning the declaration it replaced
    pub fn insert_type(&mut self, decl: TypeDecl) -> Option<TypeDecl> {
        self.types.insert(decl.name.clone(), decl)
    }

    pub fn routine(&self, id: &str) -> Option<&Routine> {
        self.routines.get(id)
    }

    pub fn type_decl(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }

    /// Routines with facts, ordered by identity
    pub fn routines(&self) -> impl Iterator<Item = &Routine> {
        self.routines.values()
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.values()
    }

    pub fn routine_count(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty() && self.types.is_empty()
    }

    /// Every routine identity mentioned anywhere: routines with facts, call
    /// targets (for virtual calls, every override candidate but not the
    /// method itself) and allocators.
    pub fn referenced_ids(&self) -> BTreeSet<RoutineId> {
        let mut ids: BTreeSet<RoutineId> = self.routines.keys().cloned().collect();
        for routine in self.routines.values() {
            for site in &routine.calls {
                ids.extend(site.target.candidates().iter().cloned());
            }
            for alloc in &routine.allocations {
                ids.insert(alloc.allocator.clone());
            }
        }
        ids
    }
}

impl FactSource for FactSet {
    fn load(&self) -> Result<FactSet> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contract;

    #[test]
    fn test_referenced_ids_include_callees_without_facts() {
        let facts = FactSet::new()
            .with_routine(
                Routine::new("heapScan")
                    .declared(Contract::Uninterruptible)
                    .calls("alloc")
                    .calls_virtual("Visitor.visit", ["A.visit"]),
            )
            .with_routine(Routine::new("lock").allocates("gcmalloc"));

        let ids: Vec<String> = facts
            .referenced_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["A.visit", "alloc", "gcmalloc", "heapScan", "lock"]);
    }

    #[test]
    fn test_insert_routine_replaces() {
        let mut facts = FactSet::new();
        assert!(facts.insert_routine(Routine::new("a")).is_none());
        let previous = facts.insert_routine(Routine::new("a").declared(Contract::Unpreemptible));
        assert_eq!(previous, Some(Routine::new("a")));
        assert_eq!(facts.routine_count(), 1);
    }

    #[test]
    fn test_fact_set_is_its_own_source() {
        let facts = FactSet::new().with_type(TypeDecl::new("Plan"));
        let loaded = facts.load().unwrap();
        assert_eq!(loaded, facts);
    }
}
