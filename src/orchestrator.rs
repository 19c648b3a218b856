//! Drives a pipeline: runs each phase group concurrently behind a true
//! join barrier, threads the execution context forward, applies
//! cancellation and the abort policy, and hands the terminal snapshot to
//! the report synthesizer.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{Artifact, ExecutionContext};
use crate::error::PipelineError;
use crate::outcome::{TaskOutcome, TaskRecord};
use crate::pipeline::Pipeline;
use crate::report::{Report, ReportSynthesizer};
use crate::runner;

// ── Run state / abort policy ─────────────────────────────────────

/// Observable run state. Transitions only move forward:
/// `Pending → Running(0) → … → Running(n) → Completed | Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { phase: usize },
    Completed,
    Aborted,
}

/// When the orchestrator gives up on a run after a phase barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbortPolicy {
    /// Abort when every member of a phase failed or timed out; partial
    /// phase failures continue (fail-soft).
    #[default]
    FullPhaseFailure,
    /// Never abort on failures; the safety-biased verdict still reflects
    /// them.
    Never,
}

// ── Orchestrator ─────────────────────────────────────────────────

/// Runs pipelines. One orchestrator may be reused across runs; state
/// tracks the most recent run.
#[derive(Debug, Default)]
pub struct Orchestrator {
    abort_policy: AbortPolicy,
    state: Mutex<Option<RunState>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(abort_policy: AbortPolicy) -> Self {
        Self {
            abort_policy,
            state: Mutex::new(None),
        }
    }

    /// State of the most recent run, if any.
    pub fn state(&self) -> Option<RunState> {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = Some(state);
    }

    /// Execute `pipeline` to completion and synthesize the report.
    ///
    /// `seed_inputs` must supply exactly the pipeline's declared seed
    /// keys. On abort (policy or cancellation) the error carries a
    /// partial report built from every outcome recorded so far.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        synthesizer: &ReportSynthesizer,
        seed_inputs: HashMap<String, Artifact>,
        cancel: CancellationToken,
    ) -> Result<Report, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        self.set_state(RunState::Pending);

        for key in pipeline.seed_keys() {
            if !seed_inputs.contains_key(key) {
                return Err(PipelineError::MissingArtifact(key.clone()));
            }
        }
        for key in seed_inputs.keys() {
            if !pipeline.seed_keys().contains(key) {
                return Err(PipelineError::Configuration(format!(
                    "seed input `{key}` is not declared by the pipeline"
                )));
            }
        }

        tracing::info!(
            run_id,
            phases = pipeline.phases().len(),
            capabilities = pipeline.capability_count(),
            "Pipeline run starting"
        );

        let ctx = ExecutionContext::new();
        for (key, value) in seed_inputs {
            ctx.set(&key, value)?;
        }

        let mut history: Vec<TaskRecord> = Vec::new();

        for (phase_idx, phase) in pipeline.phases().iter().enumerate() {
            self.set_state(RunState::Running { phase: phase_idx });
            tracing::info!(
                run_id,
                phase = phase_idx,
                name = phase.name(),
                members = phase.len(),
                "Phase starting"
            );

            // All members observe the context frozen at phase entry.
            let snapshot = ctx.snapshot();
            let mut join: JoinSet<(Arc<dyn crate::capability::Capability>, Result<runner::TaskExecution, PipelineError>)> =
                JoinSet::new();
            for cap in phase.members() {
                let cap = Arc::clone(cap);
                let snap = snapshot.clone();
                let cancel = cancel.clone();
                join.spawn(async move {
                    let result = runner::run_capability(cap.as_ref(), &snap, &cancel).await;
                    (cap, result)
                });
            }

            // True barrier: drain every member to a terminal outcome even
            // if one of them surfaced a fatal wiring error.
            let mut failures = 0usize;
            let mut fatal: Option<PipelineError> = None;
            while let Some(joined) = join.join_next().await {
                match joined {
                    Ok((cap, Ok(execution))) => {
                        if let TaskOutcome::Success(artifact) = &execution.outcome {
                            if let Err(err) = ctx.set(cap.produces(), artifact.clone()) {
                                fatal.get_or_insert(err);
                            }
                        } else {
                            failures += 1;
                        }
                        tracing::info!(
                            run_id,
                            phase = phase_idx,
                            capability = cap.name(),
                            outcome = execution.outcome.label(),
                            attempts = execution.attempts,
                            elapsed_ms = execution.elapsed_ms,
                            "Capability finished"
                        );
                        history.push(TaskRecord {
                            capability: cap.name().to_string(),
                            output_key: cap.produces().to_string(),
                            mandatory: cap.mandatory(),
                            phase: phase_idx,
                            outcome: execution.outcome,
                            attempts: execution.attempts,
                            elapsed_ms: execution.elapsed_ms,
                        });
                    }
                    Ok((_cap, Err(err))) => {
                        fatal.get_or_insert(err);
                    }
                    Err(join_err) => {
                        fatal.get_or_insert(PipelineError::Internal(format!(
                            "capability task panicked: {join_err}"
                        )));
                    }
                }
            }

            if let Some(err) = fatal {
                self.set_state(RunState::Aborted);
                return Err(err);
            }

            if cancel.is_cancelled() {
                tracing::warn!(run_id, phase = phase_idx, "Run cancelled by caller");
                self.set_state(RunState::Aborted);
                return Err(PipelineError::Aborted {
                    phase: phase_idx,
                    report: Box::new(synthesizer.synthesize(&run_id, &ctx.snapshot(), &history)),
                });
            }

            if self.abort_policy == AbortPolicy::FullPhaseFailure && failures == phase.len() {
                tracing::warn!(
                    run_id,
                    phase = phase_idx,
                    name = phase.name(),
                    "Every member of the phase failed, aborting run"
                );
                self.set_state(RunState::Aborted);
                return Err(PipelineError::Aborted {
                    phase: phase_idx,
                    report: Box::new(synthesizer.synthesize(&run_id, &ctx.snapshot(), &history)),
                });
            }
        }

        let report = synthesizer.synthesize(&run_id, &ctx.snapshot(), &history);
        self.set_state(RunState::Completed);
        tracing::info!(run_id, verdict = report.verdict.label(), "Pipeline run completed");
        Ok(report)
    }
}

// ── Tests ────────────────────────────────────────────────────────
