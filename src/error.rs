//! Run-level error taxonomy.
//!
//! Only two classes of problem surface as run-level failures: pipeline
//! definitions that violate build-time invariants, and explicit abort
//! (caller cancellation or the abort policy). Every per-capability problem
//! is absorbed into a [`TaskOutcome`](crate::outcome::TaskOutcome) and
//! reported as a caveat instead of crashing the run.

use crate::report::Report;

/// Errors that terminate pipeline construction or an entire run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The pipeline definition violates a build-time invariant
    /// (unsatisfiable input key, same-phase dependency, duplicate
    /// producer). Raised before any capability executes.
    #[error("pipeline configuration error: {0}")]
    Configuration(String),

    /// A second write targeted an artifact key that is already present.
    /// Indicates a wiring bug; fatal to the run.
    #[error("duplicate artifact key `{0}`")]
    DuplicateArtifact(String),

    /// A required artifact key was absent from the context. Indicates a
    /// wiring bug; fatal to the run.
    #[error("missing artifact key `{0}`")]
    MissingArtifact(String),

    /// The run was stopped by the abort policy or caller cancellation.
    /// The partial report covers every outcome recorded before the abort.
    #[error("pipeline aborted during phase {phase}")]
    Aborted {
        /// Index of the phase that was running when the abort triggered.
        phase: usize,
        /// Report synthesized from the outcomes recorded so far.
        report: Box<Report>,
    },

    /// An orchestration-internal failure (e.g. a capability task panicked).
    /// A bug of the same class as the artifact contract violations.
    #[error("internal orchestration failure: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The partial report attached to an abort, if any.
    pub fn partial_report(&self) -> Option<&Report> {
        match self {
            Self::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}
