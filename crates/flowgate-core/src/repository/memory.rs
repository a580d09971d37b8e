//! In-memory `WorkflowRepository` backed by `DashMap`.
//!
//! Cloning shares the underlying maps, so a clone handed to the orchestrator
//! and a clone kept by a test observe the same state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::{
    ApprovalRequest, ExecutionStatus, WorkflowDefinition, WorkflowExecution,
    WorkflowStepExecution,
};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    definitions: Arc<DashMap<Uuid, WorkflowDefinition>>,
    executions: Arc<DashMap<Uuid, WorkflowExecution>>,
    step_executions: Arc<DashMap<Uuid, WorkflowStepExecution>>,
    approvals: Arc<DashMap<Uuid, ApprovalRequest>>,
    /// execution id -> id of its pending approval request
    open_approvals: Arc<DashMap<Uuid, Uuid>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.insert(def.id, def.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(id).map(|d| d.clone()))
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> = self
            .definitions
            .iter()
            .filter(|d| organization_id.is_none_or(|org| d.organization_id == *org))
            .map(|d| d.clone())
            .collect();
        defs.sort_by_key(|d| (d.created_at, d.id));
        Ok(defs)
    }

    async fn deactivate_definition(
        &self,
        id: &Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.definitions.get_mut(id) {
            Some(mut def) => {
                def.is_active = false;
                def.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        match self.executions.entry(execution.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            ))),
            Entry::Vacant(slot) => {
                let mut stored = execution.clone();
                stored.step_executions.clear();
                slot.insert(stored);
                Ok(())
            }
        }
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut stored = self
            .executions
            .get_mut(&execution.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = execution.clone();
        stored.step_executions.clear();
        Ok(())
    }

    async fn transition_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionStatus,
    ) -> Result<bool, RepositoryError> {
        let mut stored = self
            .executions
            .get_mut(&execution.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = execution.clone();
        stored.step_executions.clear();
        Ok(true)
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(id).map(|e| e.clone()))
    }

    async fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut execs: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect();
        execs.sort_by_key(|e| (e.started_at, e.id));
        Ok(execs)
    }

    async fn create_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> Result<(), RepositoryError> {
        self.step_executions.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> Result<(), RepositoryError> {
        let mut stored = self
            .step_executions
            .get_mut(&step.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = step.clone();
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, RepositoryError> {
        let mut steps: Vec<WorkflowStepExecution> = self
            .step_executions
            .iter()
            .filter(|s| s.workflow_execution_id == *execution_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by_key(|s| (s.started_at, s.id));
        Ok(steps)
    }

    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        match self.open_approvals.entry(approval.workflow_execution_id) {
            Entry::Occupied(existing) => Err(RepositoryError::Conflict(format!(
                "execution {} already has open approval {}",
                approval.workflow_execution_id,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                if approval.is_open() {
                    slot.insert(approval.id);
                }
                self.approvals.insert(approval.id, approval.clone());
                Ok(())
            }
        }
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.approvals.get(id).map(|a| a.clone()))
    }

    async fn resolve_approval(
        &self,
        id: &Uuid,
        approver_id: Option<Uuid>,
        approved: bool,
        comments: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let execution_id = {
            let Some(mut approval) = self.approvals.get_mut(id) else {
                return Ok(false);
            };
            if !approval.is_open() {
                return Ok(false);
            }
            approval.approved = Some(approved);
            approval.approver_id = approver_id;
            approval.comments = comments.map(str::to_string);
            approval.decided_at = Some(decided_at);
            approval.workflow_execution_id
        };
        self.open_approvals
            .remove_if(&execution_id, |_, open_id| open_id == id);
        Ok(true)
    }

    async fn find_open_approval(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let Some(open_id) = self.open_approvals.get(execution_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.approvals.get(&open_id).map(|a| a.clone()))
    }

    async fn list_open_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut open: Vec<ApprovalRequest> = self
            .approvals
            .iter()
            .filter(|a| a.is_open())
            .map(|a| a.clone())
            .collect();
        open.sort_by_key(|a| (a.requested_at, a.id));
        Ok(open)
    }

    async fn list_approvals_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut approvals: Vec<ApprovalRequest> = self
            .approvals
            .iter()
            .filter(|a| a.workflow_execution_id == *execution_id)
            .map(|a| a.clone())
            .collect();
        approvals.sort_by_key(|a| (a.requested_at, a.id));
        Ok(approvals)
    }
}
