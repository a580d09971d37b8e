//! Parallel fan-out coordinator.
//!
//! Runs every branch of a PARALLEL step concurrently via `tokio::JoinSet`,
//! each on a private copy of the parent context and with its own retries and
//! audit record. All branches are joined before a result is produced, and
//! results are reported in declaration order regardless of completion order.

use std::sync::Arc;

use flowgate_types::workflow::{ContextMap, WorkflowDefinition, WorkflowStepDefinition};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::context::ExecutionContext;
use super::handler::{StepError, StepOutcome};
use super::retry::RetryController;
use super::step_runner::{StepRun, StepRunError, StepRunner, StepTarget};

/// Output of one joined branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchOutput {
    pub step_id: String,
    pub output: ContextMap,
}

/// The ordered branch list recorded as the parent step's output.
pub fn branch_outputs_value(outputs: &[BranchOutput]) -> Value {
    serde_json::to_value(outputs).unwrap_or(Value::Null)
}

pub struct ParallelCoordinator<R: WorkflowRepository> {
    runner: Arc<StepRunner<R>>,
}

impl<R: WorkflowRepository + 'static> ParallelCoordinator<R> {
    pub fn new(runner: Arc<StepRunner<R>>) -> Self {
        Self { runner }
    }

    /// Fan out `parent.parallel_step_ids` and join them.
    ///
    /// Any branch failure fails the whole step; the first failure in
    /// declaration order is returned once every branch has finished.
    pub async fn run(
        &self,
        workflow_id: Uuid,
        execution_id: Uuid,
        parent: &WorkflowStepDefinition,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        retry: RetryController,
    ) -> Result<Vec<BranchOutput>, StepRunError> {
        let mut branches = Vec::with_capacity(parent.parallel_step_ids.len());
        for id in &parent.parallel_step_ids {
            let step = definition.step(id).cloned().ok_or_else(|| StepRunError::Failed {
                step_id: parent.id.clone(),
                retries: 0,
                source: StepError::Config(format!("parallel branch '{id}' is not defined")),
            })?;
            branches.push(step);
        }

        tracing::debug!(
            execution_id = %execution_id,
            step_id = %parent.id,
            branches = branches.len(),
            "fanning out parallel branches"
        );

        let mut join_set = JoinSet::new();
        for (index, step) in branches.iter().cloned().enumerate() {
            let runner = Arc::clone(&self.runner);
            let branch_ctx = context.clone();
            let parent_id = parent.id.clone();

            join_set.spawn(async move {
                let target = StepTarget {
                    workflow_id,
                    execution_id,
                    step: &step,
                    parent_step_id: Some(&parent_id),
                    context: &branch_ctx,
                };
                let result = runner.run(target, &retry).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<StepRun, StepRunError>>> =
            (0..branches.len()).map(|_| None).collect();
        let mut abort_reason = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, error = %e, "parallel branch task aborted");
                    abort_reason.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let mut outputs = Vec::with_capacity(branches.len());
        for (step, result) in branches.iter().zip(results) {
            match result {
                Some(Ok(run)) => outputs.push(BranchOutput {
                    step_id: step.id.clone(),
                    output: branch_output(&step.id, run.outcome)?,
                }),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(StepRunError::BranchAborted {
                        step_id: step.id.clone(),
                        reason: abort_reason.clone().unwrap_or_else(|| "task lost".to_string()),
                    });
                }
            }
        }

        Ok(outputs)
    }
}

fn branch_output(step_id: &str, outcome: StepOutcome) -> Result<ContextMap, StepRunError> {
    match outcome {
        StepOutcome::Output(map) | StepOutcome::Branch { output: map, .. } => Ok(map),
        StepOutcome::Suspend { .. } => Err(StepRunError::Failed {
            step_id: step_id.to_string(),
            retries: 0,
            source: StepError::Config("parallel branches cannot wait for approval".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::BoxFuture;
    use crate::repository::InMemoryWorkflowRepository;
    use crate::workflow::checkpoint::CheckpointManager;
    use crate::workflow::handler::{StepHandler, StepHandlerRegistry, StepInput};
    use chrono::Utc;
    use flowgate_types::workflow::{RetryPolicy, StepExecutionStatus, StepType};
    use serde_json::json;
    use std::time::Duration;

    /// Sleeps for `config.delay_ms`, fails when `config.fail` is set, and
    /// echoes a context value to prove the branch saw its private copy.
    struct Delayed;

    impl StepHandler for Delayed {
        fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
            Box::pin(async move {
                let delay = input.step.config.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if input.step.config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                    return Err(StepError::Transform(format!("{} failed", input.step.id)));
                }
                let mut out = ContextMap::new();
                out.insert("seen".to_string(), input.context.lookup("seed").cloned().unwrap_or(Value::Null));
                out.insert("branch".to_string(), json!(input.step.id));
                Ok(StepOutcome::Output(out))
            })
        }
    }

    fn definition(steps: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "id": Uuid::now_v7(),
            "name": "fanout",
            "organization_id": Uuid::now_v7(),
            "steps": steps,
            "start_step_id": "fan",
            "created_by": Uuid::now_v7(),
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        }))
        .unwrap()
    }

    fn coordinator() -> (
        ParallelCoordinator<InMemoryWorkflowRepository>,
        Arc<CheckpointManager<InMemoryWorkflowRepository>>,
    ) {
        let checkpoint = Arc::new(CheckpointManager::new(Arc::new(InMemoryWorkflowRepository::new())));
        let mut registry = StepHandlerRegistry::new();
        registry.register(StepType::Transform, Arc::new(Delayed));
        let runner = Arc::new(StepRunner::new(registry, checkpoint.clone()));
        (ParallelCoordinator::new(runner), checkpoint)
    }

    fn retry() -> RetryController {
        RetryController::new(RetryPolicy { base_delay_ms: 1, max_delay_ms: 2, jitter: 0.0 })
    }

    fn seeded_context() -> ExecutionContext {
        let mut values = ContextMap::new();
        values.insert("seed".to_string(), json!(42));
        ExecutionContext::new(values, 1024 * 1024)
    }

    #[tokio::test]
    async fn outputs_follow_declaration_order() {
        let def = definition(json!([
            { "id": "fan", "name": "Fan", "type": "parallel", "parallel_step_ids": ["a", "b"] },
            { "id": "a", "name": "A", "type": "transform", "config": { "delay_ms": 40 } },
            { "id": "b", "name": "B", "type": "transform", "config": { "delay_ms": 0 } }
        ]));
        let (coordinator, checkpoint) = coordinator();
        let exec = Uuid::now_v7();

        let outputs = coordinator
            .run(def.id, exec, def.step("fan").unwrap(), &def, &seeded_context(), retry())
            .await
            .unwrap();

        let ids: Vec<&str> = outputs.iter().map(|o| o.step_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(outputs[0].output["seen"], json!(42));
        assert_eq!(outputs[1].output["branch"], json!("b"));

        let history = checkpoint.step_history(exec).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.parent_step_id.as_deref() == Some("fan")));
        assert!(history.iter().all(|r| r.status == StepExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn first_declared_failure_is_reported_after_join() {
        let def = definition(json!([
            { "id": "fan", "name": "Fan", "type": "parallel", "parallel_step_ids": ["ok", "slow_fail", "fast_fail"] },
            { "id": "ok", "name": "Ok", "type": "transform", "config": { "delay_ms": 30 } },
            { "id": "slow_fail", "name": "Slow", "type": "transform", "config": { "delay_ms": 20, "fail": true } },
            { "id": "fast_fail", "name": "Fast", "type": "transform", "config": { "fail": true } }
        ]));
        let (coordinator, checkpoint) = coordinator();
        let exec = Uuid::now_v7();

        let err = coordinator
            .run(def.id, exec, def.step("fan").unwrap(), &def, &seeded_context(), retry())
            .await
            .unwrap_err();

        match err {
            StepRunError::Failed { step_id, .. } => assert_eq!(step_id, "slow_fail"),
            other => panic!("unexpected error: {other:?}"),
        }

        // The successful sibling still ran to completion before the join.
        let history = checkpoint.step_history(exec).await.unwrap();
        assert_eq!(history.len(), 3);
        let ok = history.iter().find(|r| r.step_id == "ok").unwrap();
        assert_eq!(ok.status, StepExecutionStatus::Completed);
    }
}
