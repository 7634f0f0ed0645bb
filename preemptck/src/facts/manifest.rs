//! TOML fact manifest
//!
//! A manifest is the file form of a [`FactSet`]. Spans of names, contract
//! tags and call targets are kept so diagnostics can point back into the
//! file.
//!
//! ```toml
//! [[type]]
//! name = "org.mmtk.HeapScanner"
//! default = "uninterruptible"
//!
//! [[routine]]
//! name = "heapScan"
//! type = "org.mmtk.HeapScanner"
//! calls = ["scanObject"]
//! virtual-calls = [{ method = "Visitor.visit", candidates = ["A.visit", "B.visit"] }]
//! ```

use serde::Deserialize;
use toml::Spanned;

use super::{FactSet, FactSource};
use crate::config::CheckSection;
use crate::error::{CheckError, Result};
use crate::model::{AllocationSite, CallTarget, Contract, Linkage, Routine, Span, TypeDecl};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    check: CheckSection,
    #[serde(default, rename = "type")]
    types: Vec<RawType>,
    #[serde(default, rename = "routine")]
    routines: Vec<RawRoutine>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawType {
    name: Spanned<String>,
    default: Option<Spanned<String>>,
    #[serde(default)]
    defaults: Vec<Spanned<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct RawRoutine {
    name: Spanned<String>,
    #[serde(rename = "type")]
    enclosing_type: Option<String>,
    contract: Option<Spanned<String>>,
    #[serde(default)]
    contracts: Vec<Spanned<String>>,
    reason: Option<String>,
    #[serde(default)]
    calls: Vec<Spanned<String>>,
    #[serde(default)]
    virtual_calls: Vec<Spanned<RawVirtualCall>>,
    #[serde(default)]
    allocates: Vec<Spanned<String>>,
    #[serde(default)]
    gc_roots: bool,
    #[serde(default)]
    linkage: Linkage,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVirtualCall {
    method: String,
    candidates: Vec<String>,
}

/// A parsed fact manifest together with its source text
#[derive(Debug, Clone)]
pub struct Manifest {
    name: String,
    source: String,
    facts: FactSet,
    check: CheckSection,
}

impl Manifest {
    /// Parse manifest text; `name` is only used for diagnostics
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let raw: RawManifest = toml::from_str(source).map_err(|e| CheckError::Manifest {
            message: e.message().to_string(),
            span: e.span().map(Span::from),
        })?;

        let mut facts = FactSet::new();

        for ty in raw.types {
            let span = span_of(&ty.name);
            let mut decl = TypeDecl::new(ty.name.into_inner()).at(span);
            for tag in ty.default.iter().chain(ty.defaults.iter()) {
                decl.defaults.push(parse_contract(tag)?);
            }
            if facts.type_decl(decl.name.as_str()).is_some() {
                return Err(CheckError::manifest(
                    format!("type `{}` is declared more than once", decl.name),
                    span,
                ));
            }
            facts.insert_type(decl);
        }

        for raw_routine in raw.routines {
            let routine = lower_routine(raw_routine)?;
            if facts.routine(routine.id.as_str()).is_some() {
                let span = routine.span;
                return Err(CheckError::Manifest {
                    message: format!("routine `{}` is declared more than once", routine.id),
                    span,
                });
            }
            facts.insert_routine(routine);
        }

        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            facts,
            check: raw.check,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    /// The manifest's `[check]` table
    pub fn check_section(&self) -> &CheckSection {
        &self.check
    }
}

impl FactSource for Manifest {
    fn load(&self) -> Result<FactSet> {
        Ok(self.facts.clone())
    }
}

fn lower_routine(raw: RawRoutine) -> Result<Routine> {
    let span = span_of(&raw.name);
    let mut routine = Routine::new(raw.name.into_inner()).at(span);
    routine.enclosing_type = raw.enclosing_type.map(Into::into);
    routine.justification = raw.reason;
    routine.linkage = raw.linkage;
    routine.gc_roots = raw.gc_roots;

    for tag in raw.contract.iter().chain(raw.contracts.iter()) {
        routine.declared.push(parse_contract(tag)?);
    }

    for callee in raw.calls {
        let site_span = span_of(&callee);
        routine = routine.push_call(CallTarget::Direct(callee.into_inner().into()), Some(site_span));
    }

    for call in raw.virtual_calls {
        let site_span = span_of(&call);
        let call = call.into_inner();
        if call.candidates.is_empty() {
            return Err(CheckError::manifest(
                format!(
                    "virtual call to `{}` in `{}` lists no override candidates",
                    call.method, routine.id
                ),
                site_span,
            ));
        }
        let target = CallTarget::Virtual {
            method: call.method.into(),
            candidates: call.candidates.into_iter().map(Into::into).collect(),
        };
        routine = routine.push_call(target, Some(site_span));
    }

    for allocator in raw.allocates {
        let site_span = span_of(&allocator);
        routine = routine.push_allocation(AllocationSite {
            allocator: allocator.into_inner().into(),
            span: Some(site_span),
        });
    }

    Ok(routine)
}

fn parse_contract(tag: &Spanned<String>) -> Result<Contract> {
    tag.get_ref()
        .parse::<Contract>()
        .map_err(|e| CheckError::manifest(e.to_string(), span_of(tag)))
}

fn span_of<T>(spanned: &Spanned<T>) -> Span {
    spanned.span().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoutineId;

    const HEAP: &str = r#"
[[type]]
name = "HeapScanner"
default = "uninterruptible"

[[routine]]
name = "heapScan"
type = "HeapScanner"
reason = "walks raw heap memory"
calls = ["alloc", "scanObject"]
virtual-calls = [{ method = "Visitor.visit", candidates = ["A.visit", "B.visit"] }]
allocates = ["alloc"]

[[routine]]
name = "alloc"
contract = "interruptible"
gc-roots = true
linkage = "internal"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse("heap.toml", HEAP).unwrap();
        let facts = manifest.facts();

        let decl = facts.type_decl("HeapScanner").unwrap();
        assert_eq!(decl.defaults, vec![Contract::Uninterruptible]);

        let scan = facts.routine("heapScan").unwrap();
        assert!(scan.declared.is_empty());
        assert_eq!(scan.enclosing_type.as_ref().map(|t| t.as_str()), Some("HeapScanner"));
        assert_eq!(scan.justification.as_deref(), Some("walks raw heap memory"));
        assert_eq!(scan.calls.len(), 3);
        assert_eq!(scan.calls[2].id, "heapScan#2");
        assert_eq!(
            scan.calls[2].target.candidates(),
            &[RoutineId::from("A.visit"), RoutineId::from("B.visit")]
        );
        assert_eq!(scan.allocations[0].allocator.as_str(), "alloc");

        let alloc = facts.routine("alloc").unwrap();
        assert_eq!(alloc.declared, vec![Contract::Interruptible]);
        assert!(alloc.gc_roots);
        assert_eq!(alloc.linkage, Linkage::Internal);
    }

    #[test]
    fn test_call_spans_point_at_callee_names() {
        let manifest = Manifest::parse("heap.toml", HEAP).unwrap();
        let scan = manifest.facts().routine("heapScan").unwrap();
        let span = scan.calls[0].span.unwrap();
        assert_eq!(manifest.source()[span.start..span.end].trim_matches('"'), "alloc");
    }

    #[test]
    fn test_unknown_contract_is_reported_with_span() {
        let source = "[[routine]]\nname = \"f\"\ncontract = \"preemptible\"\n";
        let err = Manifest::parse("bad.toml", source).unwrap_err();
        match err {
            CheckError::Manifest { message, span } => {
                assert!(message.contains("preemptible"));
                let span = span.unwrap();
                assert_eq!(source[span.start..span.end].trim_matches('"'), "preemptible");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_routine_rejected() {
        let source = "[[routine]]\nname = \"f\"\n\n[[routine]]\nname = \"f\"\n";
        let err = Manifest::parse("dup.toml", source).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_multiple_tags_are_kept_for_validation() {
        let source = "[[routine]]\nname = \"f\"\ncontracts = [\"uninterruptible\", \"interruptible\"]\n";
        let manifest = Manifest::parse("multi.toml", source).unwrap();
        assert_eq!(
            manifest.facts().routine("f").unwrap().declared,
            vec![Contract::Uninterruptible, Contract::Interruptible]
        );
    }

    #[test]
    fn test_check_section_is_read() {
        let source = "[check]\npolicy = \"warn\"\n";
        let manifest = Manifest::parse("cfg.toml", source).unwrap();
        assert_eq!(
            manifest.check_section().policy,
            Some(crate::config::ViolationPolicy::Warn)
        );
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            Manifest::parse("broken.toml", "[[routine]\n"),
            Err(CheckError::Manifest { .. })
        ));
    }
}
