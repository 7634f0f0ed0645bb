//! Contract model
//!
//! Plain data describing routines, their declared preemption contracts and
//! the call sites that connect them. Nothing here has behavior beyond
//! construction and lookup; resolution and checking live in
//! [`crate::resolve`] and [`crate::verify`].

mod span;

pub use span::Span;

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Preemption-safety classification of a routine.
///
/// Variants are declared from most to least permissive, so the derived
/// ordering is the strictness ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Contract {
    /// GC and thread scheduling may occur anywhere in the routine
    #[default]
    Interruptible,
    /// Preemption stays legal but no voluntary yield points are inserted
    Unpreemptible,
    /// No GC and no scheduling, transitively through every callee
    Uninterruptible,
}

impl Contract {
    pub const ALL: [Contract; 3] = [
        Contract::Interruptible,
        Contract::Unpreemptible,
        Contract::Uninterruptible,
    ];

    /// 0 for the most permissive contract, 2 for the strictest
    pub fn strictness(self) -> u8 {
        match self {
            Contract::Interruptible => 0,
            Contract::Unpreemptible => 1,
            Contract::Uninterruptible => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Contract::Interruptible => "interruptible",
            Contract::Unpreemptible => "unpreemptible",
            Contract::Uninterruptible => "uninterruptible",
        }
    }

    pub fn is_uninterruptible(self) -> bool {
        matches!(self, Contract::Uninterruptible)
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown contract name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown contract `{0}` (expected interruptible, unpreemptible or uninterruptible)")]
pub struct ParseContractError(pub String);

impl FromStr for Contract {
    type Err = ParseContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interruptible" => Ok(Contract::Interruptible),
            "unpreemptible" => Ok(Contract::Unpreemptible),
            "uninterruptible" => Ok(Contract::Uninterruptible),
            _ => Err(ParseContractError(s.to_string())),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique routine identity, e.g. `org.mmtk.plan.Plan.collect`
    RoutineId
);

string_id!(
    /// Name of an enclosing type
    TypeName
);

/// Symbol visibility of a routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    #[default]
    External,
    /// Static linkage; the runtime cannot locate such a routine's stack maps
    Internal,
}

/// What a call site may invoke at runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallTarget {
    /// Statically bound call
    Direct(RoutineId),
    /// Dynamically dispatched call, over-approximated by every known override
    Virtual {
        method: RoutineId,
        candidates: Vec<RoutineId>,
    },
    /// Object allocation, a call into the allocator
    Allocation(RoutineId),
}

impl CallTarget {
    /// Every routine this call may reach
    pub fn candidates(&self) -> &[RoutineId] {
        match self {
            CallTarget::Direct(id) | CallTarget::Allocation(id) => std::slice::from_ref(id),
            CallTarget::Virtual { candidates, .. } => candidates,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, CallTarget::Virtual { .. })
    }
}

/// One call instruction inside a routine body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Stable identity: `<caller>#<index>` for calls, `<caller>#alloc<index>`
    /// for allocations
    pub id: String,
    pub span: Option<Span>,
    pub target: CallTarget,
}

/// An object allocation inside a routine body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSite {
    /// Allocator routine the site calls into
    pub allocator: RoutineId,
    pub span: Option<Span>,
}

/// A routine as supplied by the fact source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub id: RoutineId,
    pub enclosing_type: Option<TypeName>,
    /// Raw annotation tags. Well-formed input has at most one distinct tag.
    pub declared: Vec<Contract>,
    /// Documentation only, never consulted by resolution or checking
    pub justification: Option<String>,
    pub linkage: Linkage,
    pub gc_roots: bool,
    pub calls: Vec<CallSite>,
    pub allocations: Vec<AllocationSite>,
    pub span: Option<Span>,
}

impl Routine {
    pub fn new(id: impl Into<RoutineId>) -> Self {
        Self {
            id: id.into(),
            enclosing_type: None,
            declared: Vec::new(),
            justification: None,
            linkage: Linkage::External,
            gc_roots: false,
            calls: Vec::new(),
            allocations: Vec::new(),
            span: None,
        }
    }

    pub fn in_type(mut self, ty: impl Into<TypeName>) -> Self {
        self.enclosing_type = Some(ty.into());
        self
    }

    pub fn declared(mut self, contract: Contract) -> Self {
        self.declared.push(contract);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.justification = Some(reason.into());
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn gc_roots(mut self, gc_roots: bool) -> Self {
        self.gc_roots = gc_roots;
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Add a direct call to `callee`
    pub fn calls(self, callee: impl Into<RoutineId>) -> Self {
        self.push_call(CallTarget::Direct(callee.into()), None)
    }

    /// Add a dynamically dispatched call with its override candidates
    pub fn calls_virtual<I, R>(self, method: impl Into<RoutineId>, candidates: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoutineId>,
    {
        let target = CallTarget::Virtual {
            method: method.into(),
            candidates: candidates.into_iter().map(Into::into).collect(),
        };
        self.push_call(target, None)
    }

    /// Add a call site with an explicit target and location
    pub fn push_call(mut self, target: CallTarget, span: Option<Span>) -> Self {
        let id = format!("{}#{}", self.id, self.calls.len());
        self.calls.push(CallSite { id, span, target });
        self
    }

    pub fn allocates(mut self, allocator: impl Into<RoutineId>) -> Self {
        self.allocations.push(AllocationSite {
            allocator: allocator.into(),
            span: None,
        });
        self
    }

    pub fn push_allocation(mut self, site: AllocationSite) -> Self {
        self.allocations.push(site);
        self
    }

    /// Every outgoing edge of the routine: its calls in order, then one
    /// site per allocation
    pub fn call_sites(&self) -> Vec<CallSite> {
        let allocations = self.allocations.iter().enumerate().map(|(n, site)| CallSite {
            id: format!("{}#alloc{}", self.id, n),
            span: site.span,
            target: CallTarget::Allocation(site.allocator.clone()),
        });
        self.calls.iter().cloned().chain(allocations).collect()
    }
}

/// A type and its class-level default contract tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: TypeName,
    pub defaults: Vec<Contract>,
    pub span: Option<Span>,
}

impl TypeDecl {
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            defaults: Vec::new(),
            span: None,
        }
    }

    pub fn default_contract(mut self, contract: Contract) -> Self {
        self.defaults.push(contract);
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}
