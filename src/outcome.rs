//! Terminal task outcomes and the per-run execution history.

use serde::{Deserialize, Serialize};

use crate::context::Artifact;

// ── Failure kinds ────────────────────────────────────────────────

/// Why a capability did not produce its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The execution contract returned an error (after retries).
    Execution,
    /// The caller cancelled the run before the capability finished.
    Cancelled,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Execution => "execution error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Task outcome ─────────────────────────────────────────────────

/// The terminal result of one capability execution. Every capability in a
/// phase reaches exactly one of these; none is ever silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The capability produced its artifact.
    Success(Artifact),
    /// The capability failed after exhausting its retry budget, or was
    /// cancelled.
    Failed {
        kind: FailureKind,
        message: String,
    },
    /// The capability did not finish within its timeout. The underlying
    /// call was abandoned; any late result is discarded.
    TimedOut,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Human-readable reason for a caveat entry; `None` for successes.
    pub fn caveat_reason(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::Failed { kind, message } => Some(format!("{kind}: {message}")),
            Self::TimedOut => Some("timed out".to_string()),
        }
    }
}

// ── Task record ──────────────────────────────────────────────────

/// One entry in the run's execution history: which capability ran, in
/// which phase, and how it ended.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Capability name.
    pub capability: String,
    /// The output key the capability was declared to produce.
    pub output_key: String,
    /// Whether the verdict must treat a non-success as unknown risk.
    pub mandatory: bool,
    /// Phase index the capability ran in.
    pub phase: usize,
    /// Terminal outcome.
    pub outcome: TaskOutcome,
    /// Attempts made (1 for first-try success).
    pub attempts: u32,
    /// Wall-clock duration of the whole execution including retries.
    pub elapsed_ms: u64,
}

// ── Tests ────────────────────────────────────────────────────────
