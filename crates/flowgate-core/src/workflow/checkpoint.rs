//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps `WorkflowRepository` to provide a higher-level API for recording
//! step-level audit records and execution transitions. Every transition is
//! persisted before the run loop moves forward, so a crashed process can
//! recover from the last persisted state.

use std::sync::Arc;

use chrono::Utc;
use flowgate_types::workflow::{
    ContextMap, ExecutionStatus, StepExecutionStatus, WorkflowExecution, WorkflowStepExecution,
};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Step-level checkpoints
    // -----------------------------------------------------------------------

    /// Checkpoint a step as starting: appends a `Pending` audit record with
    /// the context snapshot taken at step entry.
    pub async fn step_started(
        &self,
        execution_id: Uuid,
        step_id: &str,
        parent_step_id: Option<&str>,
        input_snapshot: ContextMap,
    ) -> Result<WorkflowStepExecution, CheckpointError> {
        let record = WorkflowStepExecution {
            id: Uuid::now_v7(),
            workflow_execution_id: execution_id,
            step_id: step_id.to_string(),
            parent_step_id: parent_step_id.map(str::to_string),
            status: StepExecutionStatus::Pending,
            input_snapshot,
            output_data: None,
            error: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: None,
        };

        self.repo
            .create_step_execution(&record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            step_id,
            record_id = %record.id,
            "checkpointed step start"
        );

        Ok(record)
    }

    /// Persist the retry counter before the next attempt.
    pub async fn step_retrying(
        &self,
        record: &mut WorkflowStepExecution,
        retries: u32,
        last_error: &str,
    ) -> Result<(), CheckpointError> {
        record.retry_count = retries;
        record.error = Some(last_error.to_string());
        self.update_step(record).await?;
        tracing::debug!(record_id = %record.id, retries, "checkpointed step retry");
        Ok(())
    }

    /// Checkpoint a step as completed successfully.
    pub async fn step_completed(
        &self,
        record: &mut WorkflowStepExecution,
        output: Value,
    ) -> Result<(), CheckpointError> {
        record.status = StepExecutionStatus::Completed;
        record.output_data = Some(output);
        record.error = None;
        record.completed_at = Some(Utc::now());
        self.update_step(record).await?;
        tracing::debug!(record_id = %record.id, "checkpointed step complete");
        Ok(())
    }

    /// Checkpoint a step as failed.
    pub async fn step_failed(
        &self,
        record: &mut WorkflowStepExecution,
        error: &str,
    ) -> Result<(), CheckpointError> {
        record.status = StepExecutionStatus::Failed;
        record.error = Some(error.to_string());
        record.completed_at = Some(Utc::now());
        self.update_step(record).await?;
        tracing::debug!(record_id = %record.id, error, "checkpointed step failed");
        Ok(())
    }

    /// Checkpoint a step as cancelled (approval rejected).
    pub async fn step_cancelled(
        &self,
        record: &mut WorkflowStepExecution,
        output: Value,
    ) -> Result<(), CheckpointError> {
        record.status = StepExecutionStatus::Cancelled;
        record.output_data = Some(output);
        record.completed_at = Some(Utc::now());
        self.update_step(record).await?;
        tracing::debug!(record_id = %record.id, "checkpointed step cancelled");
        Ok(())
    }

    /// Checkpoint a step as waiting for approval.
    pub async fn step_waiting_approval(
        &self,
        record: &mut WorkflowStepExecution,
        output: Value,
    ) -> Result<(), CheckpointError> {
        record.status = StepExecutionStatus::WaitingApproval;
        record.output_data = Some(output);
        self.update_step(record).await?;
        tracing::debug!(record_id = %record.id, "checkpointed step waiting approval");
        Ok(())
    }

    /// The most recent record of `step_id` in the given status.
    pub async fn find_step(
        &self,
        execution_id: Uuid,
        step_id: &str,
        status: StepExecutionStatus,
    ) -> Result<Option<WorkflowStepExecution>, CheckpointError> {
        let records = self.step_history(execution_id).await?;
        Ok(records
            .into_iter()
            .rev()
            .find(|r| r.step_id == step_id && r.status == status))
    }

    /// The full audit trail of an execution, oldest first.
    pub async fn step_history(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, CheckpointError> {
        self.repo
            .list_step_executions(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    async fn update_step(&self, record: &WorkflowStepExecution) -> Result<(), CheckpointError> {
        self.repo
            .update_step_execution(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Execution-level checkpoints
    // -----------------------------------------------------------------------

    /// Persist the execution's status, current step and context.
    pub async fn save_execution(&self, execution: &WorkflowExecution) -> Result<(), CheckpointError> {
        self.repo
            .update_execution(execution)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            status = %execution.status,
            current_step = execution.current_step_id.as_deref().unwrap_or("<none>"),
            "checkpointed execution"
        );
        Ok(())
    }

    /// Persist the execution only if its stored status is still `expected`.
    pub async fn transition_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionStatus,
    ) -> Result<bool, CheckpointError> {
        let applied = self
            .repo
            .transition_execution(execution, expected)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution.id,
            from = %expected,
            to = %execution.status,
            applied,
            "checkpointed execution transition"
        );
        Ok(applied)
    }

    /// Load an execution record (without its audit trail).
    pub async fn load_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution, CheckpointError> {
        self.repo
            .get_execution(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(execution_id))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// Execution not found (for restore operations).
    #[error("workflow execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use serde_json::json;

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("connection lost".to_string());
        assert!(err.to_string().contains("connection lost"));

        let err = CheckpointError::ExecutionNotFound(Uuid::nil());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn step_lifecycle_is_persisted() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let checkpoint = CheckpointManager::new(repo.clone());
        let exec_id = Uuid::now_v7();

        let mut record = checkpoint
            .step_started(exec_id, "fetch", None, ContextMap::new())
            .await
            .unwrap();
        checkpoint.step_retrying(&mut record, 1, "timeout").await.unwrap();
        checkpoint
            .step_completed(&mut record, json!({ "ok": true }))
            .await
            .unwrap();

        let history = checkpoint.step_history(exec_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, StepExecutionStatus::Completed);
        assert_eq!(history[0].retry_count, 1);
        assert!(history[0].error.is_none());
        assert!(history[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn find_step_returns_latest_matching_record() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let checkpoint = CheckpointManager::new(repo);
        let exec_id = Uuid::now_v7();

        let mut first = checkpoint
            .step_started(exec_id, "review", None, ContextMap::new())
            .await
            .unwrap();
        checkpoint
            .step_waiting_approval(&mut first, json!({}))
            .await
            .unwrap();

        let found = checkpoint
            .find_step(exec_id, "review", StepExecutionStatus::WaitingApproval)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        assert!(checkpoint
            .find_step(exec_id, "review", StepExecutionStatus::Completed)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn load_missing_execution_is_not_found() {
        let checkpoint = CheckpointManager::new(Arc::new(InMemoryWorkflowRepository::new()));
        let err = checkpoint.load_execution(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::ExecutionNotFound(_)));
    }
}
