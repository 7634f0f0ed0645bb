//! Error types and reporting

use std::io::{self, Write};

use thiserror::Error;

use crate::codegen::InternalConsistencyError;
use crate::model::Span;
use crate::resolve::MalformedOverride;
use crate::verify::{VerificationReport, Violation};

/// Result type alias
pub type Result<T> = std::result::Result<T, CheckError>;

/// Error raised by a verification run
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The fact manifest could not be read into facts
    #[error("Manifest error: {message}")]
    Manifest { message: String, span: Option<Span> },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A report or map could not be serialized for output
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    /// Routines or types carrying contradictory contract tags
    #[error("{} malformed contract override(s)", .0.len())]
    MalformedOverride(Vec<MalformedOverride>),

    /// The checker found violations and the policy denies them
    #[error("Preemption contract verification failed with {} violation(s)", .0.violations.len())]
    Violations(Box<VerificationReport>),

    /// The hint emitter disagrees with a certified result; the checker
    /// cannot be trusted for this run
    #[error("Internal consistency error: {} allocation site(s) in certified uninterruptible routines", .0.len())]
    InternalConsistency(Vec<InternalConsistencyError>),
}

impl CheckError {
    pub fn manifest(message: impl Into<String>, span: Span) -> Self {
        Self::Manifest {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Short category name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Manifest { .. } => "Manifest",
            Self::Config { .. } => "Config",
            Self::Json(_) => "Output",
            Self::MalformedOverride(_) => "Malformed override",
            Self::Violations(_) => "Contract",
            Self::InternalConsistency(_) => "Internal consistency",
        }
    }

    /// Whether the run's result must be discarded rather than reported
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency(_))
    }
}

/// Render an error with ariadne against the manifest it came from.
///
/// Errors that carry several findings produce one report per finding.
pub fn report_error(filename: &str, source: &str, error: &CheckError) -> io::Result<()> {
    match error {
        CheckError::Manifest { message, span } => {
            emit(filename, source, "Manifest error", message, *span)
        }
        CheckError::MalformedOverride(items) => {
            for item in items {
                emit(filename, source, "Malformed override", &item.to_string(), item.span)?;
            }
            Ok(())
        }
        CheckError::Violations(report) => report_violations(filename, source, report),
        CheckError::InternalConsistency(items) => {
            for item in items {
                emit(
                    filename,
                    source,
                    "Internal consistency error",
                    &item.to_string(),
                    item.span,
                )?;
            }
            Ok(())
        }
        CheckError::Io(_) | CheckError::Config { .. } | CheckError::Json(_) => {
            writeln!(io::stderr(), "{} error: {}", error.kind(), error)
        }
    }
}

/// Render every violation of a report with ariadne
pub fn report_violations(filename: &str, source: &str, report: &VerificationReport) -> io::Result<()> {
    for violation in &report.violations {
        report_violation(filename, source, violation)?;
    }
    Ok(())
}

fn report_violation(filename: &str, source: &str, violation: &Violation) -> io::Result<()> {
    emit(
        filename,
        source,
        violation.kind.code(),
        &violation.message,
        violation.span,
    )
}

fn emit(filename: &str, source: &str, title: &str, message: &str, span: Option<Span>) -> io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    if let Some(span) = span {
        Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(title)
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(message)
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((filename, Source::from(source)))
    } else {
        Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{title}: {message}"))
            .finish()
            .eprint((filename, Source::from(source)))
    }
}
