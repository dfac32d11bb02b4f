//! Non-fatal diagnostics surfaced by the builders.
//!
//! Every diagnostic is returned to the caller alongside the result it
//! concerns and is also logged at `warn` level.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Duplicate subject × condition samples were averaged.
    ReplicatesMeaned,
    /// Duplicate subject × state samples were summed.
    ReplicatesSummed,
    /// One sample per duplicated subject × state was kept.
    ReplicatesSubsampled,
    /// A tree node with zero total count was dropped.
    ZeroCountNodeDropped,
    /// A tree node with zero branch length was dropped.
    ZeroLengthNodeDropped,
    /// A sample could not be placed in the tensor.
    SampleExcluded,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ReplicatesMeaned => "replicates_meaned",
            DiagnosticKind::ReplicatesSummed => "replicates_summed",
            DiagnosticKind::ReplicatesSubsampled => "replicates_subsampled",
            DiagnosticKind::ZeroCountNodeDropped => "zero_count_node_dropped",
            DiagnosticKind::ZeroLengthNodeDropped => "zero_length_node_dropped",
            DiagnosticKind::SampleExcluded => "sample_excluded",
        }
    }
}

/// A non-fatal condition with enough context to audit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// What happened.
    pub kind: DiagnosticKind,
    /// Subject, feature or sample the condition concerns.
    pub subject: String,
    /// Additional identifiers (state values, sample ids).
    pub context: Vec<String>,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic and log it.
    pub fn emit(
        kind: DiagnosticKind,
        subject: impl Into<String>,
        context: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        let diagnostic = Self {
            kind,
            subject: subject.into(),
            context,
            message: message.into(),
        };
        log::warn!("{}", diagnostic);
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind.as_str(), self.subject, self.message)?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context.join(", "))?;
        }
        Ok(())
    }
}

/// Count diagnostics of a given kind.
pub fn count_kind(diagnostics: &[Diagnostic], kind: DiagnosticKind) -> usize {
    diagnostics.iter().filter(|d| d.kind == kind).count()
}
