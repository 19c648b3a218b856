//! Task runner: executes one capability with timeout, retry, and
//! cancellation, converting every failure into a recorded outcome rather
//! than a crash.

use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, Inputs};
use crate::context::ContextSnapshot;
use crate::error::PipelineError;
use crate::outcome::{FailureKind, TaskOutcome};

/// What one capability execution produced, with retry/timing metadata.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub outcome: TaskOutcome,
    /// Attempts made (1 for first-try success).
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Execute one capability against the phase-entry snapshot.
///
/// Per-capability problems (execution errors, timeouts, cancellation) are
/// absorbed into the returned [`TaskOutcome`]. The only `Err` path is a
/// missing declared input, which indicates a pipeline-wiring bug and is
/// fatal to the run.
pub async fn run_capability(
    cap: &dyn Capability,
    snapshot: &ContextSnapshot,
    cancel: &CancellationToken,
) -> Result<TaskExecution, PipelineError> {
    let started = Instant::now();

    // Resolve declared inputs up front. Build-time validation makes a miss
    // here impossible for a well-formed pipeline.
    let mut inputs = Inputs::new();
    for key in cap.requires() {
        let artifact = snapshot.get(&key)?.clone();
        inputs.insert(key, artifact);
    }

    let policy = cap.retry();
    let limit = cap.timeout();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(done(
                TaskOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    message: "run cancelled before execution".into(),
                },
                attempt.max(1),
                started,
            ));
        }

        attempt += 1;
        // Child token: a timeout abandons this attempt without tearing
        // down the run-level token shared with sibling capabilities.
        let attempt_cancel = cancel.child_token();

        let attempt_result = tokio::select! {
            res = tokio::time::timeout(limit, cap.execute(&inputs, &attempt_cancel)) => res,
            _ = cancel.cancelled() => {
                attempt_cancel.cancel();
                tracing::info!(capability = cap.name(), "Capability cancelled mid-execution");
                return Ok(done(
                    TaskOutcome::Failed {
                        kind: FailureKind::Cancelled,
                        message: "run cancelled during execution".into(),
                    },
                    attempt,
                    started,
                ));
            }
        };

        match attempt_result {
            Ok(Ok(artifact)) => {
                return Ok(done(TaskOutcome::Success(artifact), attempt, started));
            }
            Ok(Err(err)) => {
                if attempt > policy.max_retries {
                    tracing::warn!(
                        capability = cap.name(),
                        attempts = attempt,
                        error = %err,
                        "Capability failed, retry budget exhausted"
                    );
                    return Ok(done(
                        TaskOutcome::Failed {
                            kind: FailureKind::Execution,
                            message: format!("{err:#}"),
                        },
                        attempt,
                        started,
                    ));
                }

                let backoff = policy.backoff_for(attempt - 1);
                tracing::warn!(
                    capability = cap.name(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Capability attempt failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => {
                        return Ok(done(
                            TaskOutcome::Failed {
                                kind: FailureKind::Cancelled,
                                message: "run cancelled during retry backoff".into(),
                            },
                            attempt,
                            started,
                        ));
                    }
                }
            }
            Err(_elapsed) => {
                // Best-effort stop signal; the attempt future is dropped
                // either way and any late result is discarded.
                attempt_cancel.cancel();
                tracing::warn!(
                    capability = cap.name(),
                    timeout_ms = limit.as_millis() as u64,
                    "Capability timed out"
                );
                return Ok(done(TaskOutcome::TimedOut, attempt, started));
            }
        }
    }
}

fn done(outcome: TaskOutcome, attempts: u32, started: Instant) -> TaskExecution {
    TaskExecution {
        outcome,
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::RetryPolicy;
    use crate::context::{Artifact, ExecutionContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Capability that fails `failures` times before succeeding, with an
    /// optional per-attempt delay.
    struct Flaky {
        requires: Vec<String>,
        failures: u32,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                requires: vec![],
                failures,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn requiring(mut self, key: &str) -> Self {
            self.requires.push(key.to_string());
            self
        }
    }

    #[async_trait]
    impl Capability for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn requires(&self) -> Vec<String> {
            self.requires.clone()
        }

        fn produces(&self) -> &str {
            "flaky_out"
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(500)
        }

        fn retry(&self) -> RetryPolicy {
            RetryPolicy {
                max_retries: 2,
                backoff_base: Duration::from_millis(10),
            }
        }

        async fn execute(
            &self,
            inputs: &Inputs,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<Artifact> {
            tokio::time::sleep(self.delay).await;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("transient failure #{call}");
            }
            let echoed: Vec<&str> = inputs.keys().map(String::as_str).collect();
            Ok(Artifact::Text(format!("ok after {} inputs", echoed.len())))
        }
    }

    fn empty_snapshot() -> ContextSnapshot {
        ExecutionContext::new().snapshot()
    }

    #[tokio::test]
    async fn first_try_success() {
        let cap = Flaky::new(0);
        let exec = run_capability(&cap, &empty_snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(exec.outcome.is_success());
        assert_eq!(exec.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let cap = Flaky::new(2);
        let exec = run_capability(&cap, &empty_snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(exec.outcome.is_success());
        assert_eq!(exec.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhausted_records_failed() {
        let cap = Flaky::new(10);
        let exec = run_capability(&cap, &empty_snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        match exec.outcome {
            TaskOutcome::Failed { kind, ref message } => {
                assert_eq!(kind, FailureKind::Execution);
                assert!(message.contains("transient failure"));
            }
            ref other => panic!("expected Failed, got {other:?}"),
        }
        // first attempt + max_retries
        assert_eq!(exec.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capability_times_out_without_retry() {
        let cap = Flaky::new(0).with_delay(Duration::from_secs(5));
        let exec = run_capability(&cap, &empty_snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exec.outcome, TaskOutcome::TimedOut);
        assert_eq!(exec.attempts, 1);
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let cap = Flaky::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = run_capability(&cap, &empty_snapshot(), &cancel)
            .await
            .unwrap();
        assert!(matches!(
            exec.outcome,
            TaskOutcome::Failed {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_execution_is_recorded() {
        let cap = Flaky::new(0).with_delay(Duration::from_millis(200));
        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            killer.cancel();
        });
        let exec = run_capability(&cap, &empty_snapshot(), &cancel)
            .await
            .unwrap();
        assert!(matches!(
            exec.outcome,
            TaskOutcome::Failed {
                kind: FailureKind::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_declared_input_is_fatal() {
        let cap = Flaky::new(0).requiring("never_produced");
        let err = run_capability(&cap, &empty_snapshot(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact(k) if k == "never_produced"));
    }

    #[tokio::test]
    async fn declared_inputs_are_resolved_from_snapshot() {
        let ctx = ExecutionContext::new();
        ctx.set("seed", Artifact::Text("main".into())).unwrap();
        let cap = Flaky::new(0).requiring("seed");
        let exec = run_capability(&cap, &ctx.snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        match exec.outcome {
            TaskOutcome::Success(artifact) => {
                assert_eq!(artifact.as_text(), Some("ok after 1 inputs"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
