//! Preemption-safety contract verifier
//!
//! Declares, per routine, whether garbage collection and thread scheduling
//! may interrupt it, and proves that no `uninterruptible` routine can reach
//! a routine that may trigger GC or yield.
//!
//! A run flows through:
//!
//! 1. [`facts`]: routines, type defaults and call sites from a [`facts::FactSource`]
//! 2. [`resolve`]: effective contract of every routine
//! 3. [`graph`]: call graph and its strongly connected components
//! 4. [`verify`]: violation checking
//! 5. [`codegen`]: safepoint policy per routine
//!
//! [`pipeline::Pipeline`] strings these together under a [`config::CheckConfig`].

pub mod codegen;
pub mod config;
pub mod error;
pub mod facts;
pub mod graph;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod verify;

pub use codegen::{CodegenHint, HintMap, SafepointPolicy};
pub use config::{CheckConfig, ViolationPolicy};
pub use error::{CheckError, Result};
pub use facts::{FactSet, FactSource, Manifest};
pub use model::{Contract, Routine, RoutineId, Span, TypeDecl, TypeName};
pub use pipeline::{Pipeline, PipelineOutput};
pub use resolve::EffectiveContracts;
pub use verify::{VerificationReport, Violation, ViolationKind};
