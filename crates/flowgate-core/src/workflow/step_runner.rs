//! Step runner: dispatches one step to its handler with retries and timeouts.
//!
//! `StepRunner` owns the handler registry. For every step it appends a
//! `Pending` audit record, invokes the handler (bounded by the step timeout
//! for AGENT and API_CALL), retries transient failures through the
//! `RetryController`, and closes the record as completed, failed, or waiting
//! for approval.

use std::sync::Arc;
use std::time::Duration;

use flowgate_types::workflow::{StepType, WorkflowStepDefinition, WorkflowStepExecution};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::ExecutionContext;
use super::handler::{StepError, StepHandler, StepHandlerRegistry, StepInput, StepOutcome};
use super::retry::RetryController;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What to run and where it sits in the execution.
#[derive(Debug, Clone, Copy)]
pub struct StepTarget<'a> {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub step: &'a WorkflowStepDefinition,
    /// Set when the step runs as a PARALLEL branch.
    pub parent_step_id: Option<&'a str>,
    pub context: &'a ExecutionContext,
}

/// A step that resolved (successfully or by suspending).
#[derive(Debug, Clone)]
pub struct StepRun {
    pub record: WorkflowStepExecution,
    pub outcome: StepOutcome,
}

/// Errors surfaced to the run loop.
#[derive(Debug, thiserror::Error)]
pub enum StepRunError {
    /// The step failed for good (retries exhausted or non-retryable error).
    #[error("step '{step_id}' failed after {retries} retries: {source}")]
    Failed {
        step_id: String,
        retries: u32,
        #[source]
        source: StepError,
    },

    /// A parallel branch task panicked or was aborted.
    #[error("parallel branch '{step_id}' aborted: {reason}")]
    BranchAborted { step_id: String, reason: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

pub struct StepRunner<R: WorkflowRepository> {
    registry: StepHandlerRegistry,
    checkpoint: Arc<CheckpointManager<R>>,
}

impl<R: WorkflowRepository> StepRunner<R> {
    pub fn new(registry: StepHandlerRegistry, checkpoint: Arc<CheckpointManager<R>>) -> Self {
        Self {
            registry,
            checkpoint,
        }
    }

    pub fn registry(&self) -> &StepHandlerRegistry {
        &self.registry
    }

    /// Run a step to resolution, recording every attempt in its audit record.
    ///
    /// The recorded `retry_count` equals the retries performed and never
    /// exceeds `step.retry_count`.
    pub async fn run(
        &self,
        target: StepTarget<'_>,
        retry: &RetryController,
    ) -> Result<StepRun, StepRunError> {
        let step = target.step;
        let mut record = self
            .checkpoint
            .step_started(
                target.execution_id,
                &step.id,
                target.parent_step_id,
                target.context.snapshot(),
            )
            .await?;

        let Some(handler) = self.registry.get(step.step_type) else {
            let err = StepError::Config(format!("no handler registered for step type {}", step.step_type));
            self.checkpoint.step_failed(&mut record, &err.to_string()).await?;
            return Err(StepRunError::Failed {
                step_id: step.id.clone(),
                retries: 0,
                source: err,
            });
        };

        let input = StepInput {
            workflow_id: target.workflow_id,
            execution_id: target.execution_id,
            step,
            context: target.context,
        };

        let mut retries = 0u32;
        loop {
            match attempt(handler.as_ref(), input).await {
                Ok(outcome @ StepOutcome::Suspend { .. }) => {
                    self.checkpoint
                        .step_waiting_approval(&mut record, outcome.to_value())
                        .await?;
                    return Ok(StepRun { record, outcome });
                }
                Ok(outcome) => {
                    record.retry_count = retries;
                    self.checkpoint
                        .step_completed(&mut record, outcome.to_value())
                        .await?;
                    return Ok(StepRun { record, outcome });
                }
                Err(err) => {
                    if RetryController::should_retry(step.step_type, &err, retries, step.retry_count) {
                        retries += 1;
                        let delay = retry.backoff_delay(retries);
                        tracing::warn!(
                            execution_id = %target.execution_id,
                            step_id = %step.id,
                            retry = retries,
                            max_retries = step.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "step attempt failed, retrying"
                        );
                        self.checkpoint
                            .step_retrying(&mut record, retries, &err.to_string())
                            .await?;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    tracing::error!(
                        execution_id = %target.execution_id,
                        step_id = %step.id,
                        retries,
                        error = %err,
                        "step failed"
                    );
                    record.retry_count = retries;
                    self.checkpoint.step_failed(&mut record, &err.to_string()).await?;
                    return Err(StepRunError::Failed {
                        step_id: step.id.clone(),
                        retries,
                        source: err,
                    });
                }
            }
        }
    }
}

/// One handler invocation, bounded by the step timeout for AGENT and API_CALL.
async fn attempt(handler: &dyn StepHandler, input: StepInput<'_>) -> Result<StepOutcome, StepError> {
    let step = input.step;
    let bounded = matches!(step.step_type, StepType::Agent | StepType::ApiCall) && step.timeout_seconds > 0;
    if !bounded {
        return handler.handle(input).await;
    }
    match tokio::time::timeout(Duration::from_secs(step.timeout_seconds), handler.handle(input)).await {
        Ok(result) => result,
        Err(_) => Err(StepError::Timeout(step.timeout_seconds)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
