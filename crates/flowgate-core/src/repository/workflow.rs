//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow definitions, executions, step
//! execution audit records, and approval requests. The infrastructure layer
//! (flowgate-infra) implements this trait with SQLite persistence.

use chrono::{DateTime, Utc};
use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::{
    ApprovalRequest, ExecutionStatus, WorkflowDefinition, WorkflowExecution,
    WorkflowStepExecution,
};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers four entity families:
/// - **Definitions:** save/query/retire workflow definitions.
/// - **Executions:** create/update/query execution records, including a
///   compare-and-set transition used across the approval boundary.
/// - **Step executions:** the append-only audit trail.
/// - **Approvals:** approval requests with atomic conditional resolution.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List workflow definitions, optionally filtered by organization,
    /// ordered by created_at ASC.
    fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Mark a definition inactive. Returns `true` if it existed.
    fn deactivate_definition(
        &self,
        id: &Uuid,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite an execution's mutable fields (status, current step,
    /// context, completed_at, error).
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite an execution only if its stored status equals `expected`.
    ///
    /// Returns `false` (and writes nothing) when the stored status differs.
    fn transition_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get an execution by its UUID, without its step executions.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List executions currently in the given status (crash recovery).
    fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    /// Append a step execution record.
    fn create_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a step execution's status, output, error, retry count and
    /// completion time.
    fn update_step_execution(
        &self,
        step: &WorkflowStepExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step executions for an execution, ordered by started_at ASC.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStepExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Persist a new approval request.
    ///
    /// Fails with `RepositoryError::Conflict` if the execution already has an
    /// open request.
    fn create_approval(
        &self,
        approval: &ApprovalRequest,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an approval request by its UUID.
    fn get_approval(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Record a decision on an open request.
    ///
    /// Atomic: returns `true` only for the caller that moved the request out
    /// of the pending state. Already-resolved or unknown requests yield
    /// `false`.
    fn resolve_approval(
        &self,
        id: &Uuid,
        approver_id: Option<Uuid>,
        approved: bool,
        comments: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// The pending approval request for an execution, if any.
    fn find_open_approval(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// All pending approval requests, ordered by requested_at ASC.
    fn list_open_approvals(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;

    /// Every approval request of an execution, resolved or not, ordered by
    /// requested_at ASC.
    fn list_approvals_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
