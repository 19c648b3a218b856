//! Multi-phase code-review orchestration.
//!
//! Runs a pipeline of review capabilities in ordered phases, where each
//! phase fans out concurrently and later phases consume the artifacts
//! earlier phases produced:
//!
//! ```text
//!              phase 1 (gather)            phase 2 (review)
//!            ┌─▸ DiffFetcher   ─▸ diff_data      ─┬─▸ logic-reviewer   ─┐
//! base_ref ──┼─▸ CommitReader  ─▸ commit_summary ─┼─▸ style-checker    ─┼─▸ Report
//! head_ref ──┴─▸ SecretScanner ─▸ secret_scan    ─┴─▸ security-auditor ─┘
//! ```
//!
//! The guarantees the design leans on:
//! - **Write-once artifacts**: a key is produced exactly once per run;
//!   a second write is a fatal wiring bug, not a data race.
//! - **Validated wiring**: [`Pipeline::builder`] rejects a pipeline
//!   whose dependencies cannot be satisfied by phase order, so a
//!   misconfigured run fails before any capability executes.
//! - **Fail-soft phases**: one capability failing does not sink its
//!   phase; the failure becomes a caveat on the final report, and the
//!   verdict is biased toward the stricter outcome when coverage is
//!   incomplete.
//!
//! [`standard::standard_pipeline`] assembles the canonical two-phase
//! review shown above; embedders can build their own pipelines from
//! custom [`Capability`] implementations.

pub mod capability;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod pipeline;
pub mod reasoning;
pub mod report;
pub mod runner;
pub mod secrets;
pub mod standard;
pub mod vcs;

pub use capability::{Capability, RetryPolicy};
pub use context::{Artifact, ContextSnapshot, ExecutionContext};
pub use error::PipelineError;
pub use orchestrator::{AbortPolicy, Orchestrator, RunState};
pub use outcome::{FailureKind, TaskOutcome, TaskRecord};
pub use pipeline::{PhaseGroup, Pipeline, PipelineBuilder};
pub use report::{Finding, Report, ReportSynthesizer, Severity, Verdict};
pub use standard::{standard_pipeline, standard_synthesizer, ReviewConfig};
