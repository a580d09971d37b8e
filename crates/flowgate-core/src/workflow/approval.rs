//! Approval gateway: human decision points that suspend an execution.
//!
//! `ApprovalHandler` is the APPROVAL step handler: it persists an
//! `ApprovalRequest` snapshotting the context and signals suspension.
//! `ApprovalGateway` resolves requests exactly once and finds requests whose
//! deadline has passed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::{ApprovalRequest, ContextMap, WorkflowStepDefinition};
use uuid::Uuid;

use crate::collaborator::BoxFuture;
use crate::repository::workflow::WorkflowRepository;

use super::handler::{StepError, StepHandler, StepInput, StepOutcome};

/// Failure reason recorded when the deadline sweep expires a request.
pub const APPROVAL_DEADLINE_EXCEEDED: &str = "approval deadline exceeded";

// ---------------------------------------------------------------------------
// ApprovalGateway
// ---------------------------------------------------------------------------

pub struct ApprovalGateway<R: WorkflowRepository> {
    repo: Arc<R>,
}

impl<R: WorkflowRepository> Clone for ApprovalGateway<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: WorkflowRepository> ApprovalGateway<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Create the single open request for an execution.
    ///
    /// The deadline is `requested_at + step.timeout_seconds` (none when the
    /// timeout is 0).
    pub async fn open(
        &self,
        execution_id: Uuid,
        step: &WorkflowStepDefinition,
        data_to_approve: ContextMap,
    ) -> Result<ApprovalRequest, ApprovalError> {
        if let Some(existing) = self
            .repo
            .find_open_approval(&execution_id)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))?
        {
            return Err(ApprovalError::Duplicate(format!(
                "execution {execution_id} already has open approval {}",
                existing.id
            )));
        }

        let requested_at = Utc::now();
        let deadline = (step.timeout_seconds > 0)
            .then(|| i64::try_from(step.timeout_seconds).ok())
            .flatten()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| requested_at.checked_add_signed(d));

        let request = ApprovalRequest {
            id: Uuid::now_v7(),
            workflow_execution_id: execution_id,
            step_id: step.id.clone(),
            data_to_approve,
            approver_id: None,
            approved: None,
            comments: None,
            requested_at,
            decided_at: None,
            deadline,
        };

        self.repo.create_approval(&request).await.map_err(|e| match e {
            RepositoryError::Conflict(msg) => ApprovalError::Duplicate(msg),
            other => ApprovalError::Repository(other.to_string()),
        })?;

        tracing::info!(
            execution_id = %execution_id,
            step_id = %step.id,
            approval_id = %request.id,
            "approval requested"
        );
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> Result<ApprovalRequest, ApprovalError> {
        self.repo
            .get_approval(&id)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))?
            .ok_or(ApprovalError::NotFound(id))
    }

    /// Record a decision. Only the first decision on a request is accepted.
    pub async fn resolve(
        &self,
        id: Uuid,
        approver_id: Uuid,
        approved: bool,
        comments: Option<&str>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut request = self.get(id).await?;
        if !request.is_open() {
            return Err(ApprovalError::Duplicate(format!("approval {id} was already resolved")));
        }

        let decided_at = Utc::now();
        let applied = self
            .repo
            .resolve_approval(&id, Some(approver_id), approved, comments, decided_at)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))?;
        if !applied {
            return Err(ApprovalError::Duplicate(format!("approval {id} was already resolved")));
        }

        request.approver_id = Some(approver_id);
        request.approved = Some(approved);
        request.comments = comments.map(str::to_string);
        request.decided_at = Some(decided_at);
        Ok(request)
    }

    /// Open requests whose deadline is before `now`.
    pub async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let open = self
            .repo
            .list_open_approvals()
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))?;
        Ok(open.into_iter().filter(|a| a.is_expired(now)).collect())
    }

    /// Resolve an expired request as rejected-by-timeout.
    ///
    /// Returns `false` if a human decision got there first.
    pub async fn expire(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Result<bool, ApprovalError> {
        self.repo
            .resolve_approval(&request.id, None, false, Some(APPROVAL_DEADLINE_EXCEEDED), now)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))
    }

    /// Every request of an execution, oldest first.
    pub async fn for_execution(&self, execution_id: Uuid) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        self.repo
            .list_approvals_for_execution(&execution_id)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))
    }

    pub async fn find_open(&self, execution_id: Uuid) -> Result<Option<ApprovalRequest>, ApprovalError> {
        self.repo
            .find_open_approval(&execution_id)
            .await
            .map_err(|e| ApprovalError::Repository(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ApprovalHandler
// ---------------------------------------------------------------------------

/// APPROVAL step handler.
pub struct ApprovalHandler<R: WorkflowRepository> {
    gateway: ApprovalGateway<R>,
}

impl<R: WorkflowRepository> ApprovalHandler<R> {
    pub fn new(gateway: ApprovalGateway<R>) -> Self {
        Self { gateway }
    }
}

impl<R: WorkflowRepository + 'static> StepHandler for ApprovalHandler<R> {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            let request = self
                .gateway
                .open(input.execution_id, input.step, input.context.snapshot())
                .await
                .map_err(|e| StepError::Execution(e.to_string()))?;
            Ok(StepOutcome::Suspend {
                approval_id: request.id,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval not found: {0}")]
    NotFound(Uuid),

    #[error("duplicate approval: {0}")]
    Duplicate(String),

    #[error("approval repository error: {0}")]
    Repository(String),
}
