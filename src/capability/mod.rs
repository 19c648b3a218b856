//! The abstract unit of pipeline work.
//!
//! A [`Capability`] declares its identity, the artifact keys it reads, the
//! single key it produces, and a resource policy. The shape is fixed at
//! pipeline construction so inter-phase data dependencies can be checked
//! before anything runs; the execution contract itself stays a black box
//! (an external process, an HTTP call to a reasoning service, or pure
//! text processing).

pub mod gather;
pub mod review;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::context::Artifact;

/// Well-known artifact keys of the standard review pipeline.
pub mod keys {
    /// Seed: base revision to compare against (e.g. `main`).
    pub const BASE_REF: &str = "base_ref";
    /// Seed: revision under review (e.g. `HEAD` or a feature branch).
    pub const HEAD_REF: &str = "head_ref";

    /// Phase 1: unified diff + changed files + stats.
    pub const DIFF_DATA: &str = "diff_data";
    /// Phase 1: commit log between the two revisions.
    pub const COMMIT_SUMMARY: &str = "commit_summary";
    /// Phase 1: credential scan result.
    pub const SECRET_SCAN: &str = "secret_scan";

    /// Phase 2: correctness/bug review payload.
    pub const LOGIC_REVIEW: &str = "logic_review";
    /// Phase 2: style/readability review payload.
    pub const STYLE_REVIEW: &str = "style_review";
    /// Phase 2: security audit payload.
    pub const SECURITY_REVIEW: &str = "security_review";
}

/// Inputs handed to a capability: its declared keys, resolved from the
/// phase-entry snapshot.
pub type Inputs = HashMap<String, Artifact>;

/// Borrow a required text input, with a wiring-quality error message.
pub(crate) fn text_input<'a>(inputs: &'a Inputs, key: &str) -> anyhow::Result<&'a str> {
    inputs
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("input `{key}` was not resolved"))?
        .as_text()
        .ok_or_else(|| anyhow::anyhow!("input `{key}` is not a text artifact"))
}

/// Render a required input for prompt interpolation.
pub(crate) fn prompt_input(inputs: &Inputs, key: &str) -> anyhow::Result<String> {
    Ok(inputs
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("input `{key}` was not resolved"))?
        .to_prompt_text())
}

// ── Retry policy ─────────────────────────────────────────────────

/// Bounded retry with exponential backoff, applied to execution errors
/// only. Timeouts are terminal: a call that blew its budget once is not
/// granted another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Sleep before retry `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base: Duration::ZERO,
        }
    }

    /// Backoff before retry attempt `n` (0-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

// ── Capability trait ─────────────────────────────────────────────

/// A named, declared unit of analysis work.
///
/// Declared once at pipeline construction and never mutated during a run.
/// The task runner resolves `requires()` from the context snapshot, calls
/// `execute` under `timeout()`, applies `retry()` on errors, and writes a
/// successful result under `produces()`.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable, unique name within the pipeline.
    fn name(&self) -> &str;

    /// Artifact keys this capability reads, in declaration order.
    fn requires(&self) -> Vec<String>;

    /// The single artifact key this capability writes.
    fn produces(&self) -> &str;

    /// Upper bound on one execution attempt.
    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Retry policy for execution errors.
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Whether the verdict must treat a non-success from this capability
    /// as unknown risk (safety bias). Defaults to mandatory.
    fn mandatory(&self) -> bool {
        true
    }

    /// Run the capability against its resolved inputs.
    ///
    /// Implementations are expected to observe `cancel` at their own
    /// blocking points; the runner tolerates implementations that ignore
    /// it by discarding their eventual result.
    async fn execute(&self, inputs: &Inputs, cancel: &CancellationToken)
        -> anyhow::Result<Artifact>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
    }

    #[test]
    fn none_policy_does_not_retry() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
    }
}
