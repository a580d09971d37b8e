//! Workflow orchestrator: owns definitions, starts executions, walks the step
//! graph, and resumes executions across the approval boundary.
//!
//! # Execution flow
//!
//! 1. `execute_workflow` persists a RUNNING execution at `start_step_id` and
//!    spawns the run loop; the caller gets the record back immediately.
//! 2. The run loop resolves the current step, dispatches it (step runner, or
//!    the parallel coordinator for PARALLEL), merges the result into the
//!    context, and persists the advance before moving on.
//! 3. An APPROVAL step persists WAITING_APPROVAL and the loop exits with
//!    `current_step_id` still on the gate.
//! 4. `approve_step` records the decision and, if approved, advances past the
//!    gate and spawns a fresh run loop. Rejection cancels the execution.
//!
//! Every transition out of WAITING_APPROVAL is a compare-and-set on the
//! stored status, so a decision is applied exactly once even when a human,
//! the deadline sweep and a suspending run loop race.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_types::config::EngineConfig;
use flowgate_types::error::RepositoryError;
use flowgate_types::event::{event_type, workflow_topic};
use flowgate_types::workflow::{
    ApprovalRequest, ContextMap, ExecutionStatus, StepExecutionStatus, StepType,
    WorkflowDefinition, WorkflowExecution, WorkflowStepDefinition, WorkflowStepExecution,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::collaborator::{ApiClient, BoxFuture, Notifier, TaskExecutor};
use crate::repository::workflow::WorkflowRepository;

use super::approval::{APPROVAL_DEADLINE_EXCEEDED, ApprovalError, ApprovalGateway, ApprovalHandler};
use super::builtin::{AgentHandler, ApiCallHandler, ConditionHandler, TransformHandler};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{ContextError, ExecutionContext};
use super::definition::{DefinitionError, WorkflowDraft, validate_draft};
use super::handler::{StepHandler, StepHandlerRegistry, StepOutcome};
use super::parallel::{ParallelCoordinator, branch_outputs_value};
use super::retry::RetryController;
use super::step_runner::{StepRun, StepRunError, StepRunner, StepTarget};

/// Error recorded on step records closed by crash recovery.
pub const INTERRUPTED: &str = "interrupted";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// External collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub task_executor: Arc<dyn TaskExecutor>,
    pub api_client: Arc<dyn ApiClient>,
    pub notifier: Arc<dyn Notifier>,
}

/// Result of `approve_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalDecision {
    pub status: ExecutionStatus,
    pub approved: bool,
}

/// What `recover_in_flight` did with each in-flight execution it found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Run loop rescheduled.
    pub resumed: Vec<Uuid>,
    /// Parked at an approval gate whose request was already open.
    pub suspended: Vec<Uuid>,
    /// Had an already-recorded approval decision applied.
    pub decided: Vec<Uuid>,
    /// Could not be resumed and were marked FAILED.
    pub failed: Vec<Uuid>,
}

/// Errors returned by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid workflow definition: {0}")]
    DefinitionInvalid(#[from] DefinitionError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow is inactive: {0}")]
    WorkflowInactive(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("approval not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("duplicate approval: {0}")]
    DuplicateApproval(String),

    #[error(transparent)]
    Step(#[from] StepRunError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Checkpoint(CheckpointError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<CheckpointError> for OrchestratorError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::ExecutionNotFound(id) => OrchestratorError::ExecutionNotFound(id),
            other => OrchestratorError::Checkpoint(other),
        }
    }
}

impl From<ApprovalError> for OrchestratorError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound(id) => OrchestratorError::ApprovalNotFound(id),
            ApprovalError::Duplicate(msg) => OrchestratorError::DuplicateApproval(msg),
            ApprovalError::Repository(msg) => OrchestratorError::Repository(RepositoryError::Query(msg)),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder<R: WorkflowRepository> {
    repo: Arc<R>,
    collaborators: Collaborators,
    config: EngineConfig,
    overrides: Vec<(StepType, Arc<dyn StepHandler>)>,
}

impl<R: WorkflowRepository + 'static> OrchestratorBuilder<R> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the built-in handler for a step type.
    ///
    /// PARALLEL steps are always driven by the fan-out coordinator.
    pub fn handler(mut self, step_type: StepType, handler: Arc<dyn StepHandler>) -> Self {
        self.overrides.push((step_type, handler));
        self
    }

    pub fn build(self) -> WorkflowOrchestrator<R> {
        let checkpoint = Arc::new(CheckpointManager::new(Arc::clone(&self.repo)));
        let approvals = ApprovalGateway::new(Arc::clone(&self.repo));

        let mut registry = StepHandlerRegistry::new();
        registry.register(
            StepType::Agent,
            Arc::new(AgentHandler::new(Arc::clone(&self.collaborators.task_executor))),
        );
        registry.register(StepType::Transform, Arc::new(TransformHandler));
        registry.register(
            StepType::ApiCall,
            Arc::new(ApiCallHandler::new(Arc::clone(&self.collaborators.api_client))),
        );
        registry.register(StepType::Condition, Arc::new(ConditionHandler));
        registry.register(StepType::Approval, Arc::new(ApprovalHandler::new(approvals.clone())));
        for (step_type, handler) in self.overrides {
            registry.register(step_type, handler);
        }

        let runner = Arc::new(StepRunner::new(registry, Arc::clone(&checkpoint)));
        let parallel = ParallelCoordinator::new(Arc::clone(&runner));

        WorkflowOrchestrator {
            inner: Arc::new(Inner {
                repo: self.repo,
                checkpoint,
                runner,
                parallel,
                approvals,
                notifier: self.collaborators.notifier,
                config: self.config,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowOrchestrator
// ---------------------------------------------------------------------------

/// The workflow engine. Cheap to clone; clones share all state.
pub struct WorkflowOrchestrator<R: WorkflowRepository + 'static> {
    inner: Arc<Inner<R>>,
}

struct Inner<R: WorkflowRepository> {
    repo: Arc<R>,
    checkpoint: Arc<CheckpointManager<R>>,
    runner: Arc<StepRunner<R>>,
    parallel: ParallelCoordinator<R>,
    approvals: ApprovalGateway<R>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl<R: WorkflowRepository + 'static> Clone for WorkflowOrchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// What happened to the current step.
enum Advance {
    Next(Option<String>),
    Suspended(Uuid),
}

impl<R: WorkflowRepository + 'static> WorkflowOrchestrator<R> {
    pub fn builder(repo: R, collaborators: Collaborators) -> OrchestratorBuilder<R> {
        OrchestratorBuilder {
            repo: Arc::new(repo),
            collaborators,
            config: EngineConfig::default(),
            overrides: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &R {
        &self.inner.repo
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Validate and store a new, active workflow definition.
    pub async fn create_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowDefinition, OrchestratorError> {
        validate_draft(&draft)?;
        let definition = draft.into_definition();
        self.inner.repo.save_definition(&definition).await?;

        tracing::info!(
            workflow_id = %definition.id,
            name = %definition.name,
            steps = definition.steps.len(),
            "workflow created"
        );
        Ok(definition)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, OrchestratorError> {
        self.inner
            .repo
            .get_definition(&id)
            .await?
            .ok_or(OrchestratorError::WorkflowNotFound(id))
    }

    pub async fn list_workflows(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, OrchestratorError> {
        Ok(self
            .inner
            .repo
            .list_definitions(organization_id.as_ref())
            .await?)
    }

    /// Retire a definition. New executions are rejected; running ones finish.
    pub async fn deactivate_workflow(&self, id: Uuid) -> Result<WorkflowDefinition, OrchestratorError> {
        if !self.inner.repo.deactivate_definition(&id, Utc::now()).await? {
            return Err(OrchestratorError::WorkflowNotFound(id));
        }
        tracing::info!(workflow_id = %id, "workflow deactivated");
        self.get_workflow(id).await
    }

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Start an execution and schedule its run loop without waiting for it.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        initiated_by: Uuid,
        context: Option<ContextMap>,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let definition = self.get_workflow(workflow_id).await?;
        if !definition.is_active {
            return Err(OrchestratorError::WorkflowInactive(workflow_id));
        }

        let initial = ExecutionContext::new(context.unwrap_or_default(), self.inner.config.max_context_bytes);
        initial.check_size()?;

        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Running,
            current_step_id: Some(definition.start_step_id.clone()),
            context: initial.into_values(),
            initiated_by,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            step_executions: Vec::new(),
        };
        self.inner.repo.create_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            start_step = %definition.start_step_id,
            "execution started"
        );
        self.notify(
            workflow_id,
            event_type::EXECUTION_STARTED,
            json!({ "execution_id": execution.id, "initiated_by": initiated_by }),
        )
        .await;

        self.spawn_run(execution.clone(), definition);
        Ok(execution)
    }

    /// An execution with its step audit trail.
    pub async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecution, OrchestratorError> {
        let mut execution = self.inner.checkpoint.load_execution(id).await?;
        execution.step_executions = self.inner.checkpoint.step_history(id).await?;
        Ok(execution)
    }

    pub async fn get_approval(&self, id: Uuid) -> Result<ApprovalRequest, OrchestratorError> {
        Ok(self.inner.approvals.get(id).await?)
    }

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Record a decision on an approval request and resume or cancel its
    /// execution.
    pub async fn approve_step(
        &self,
        approval_id: Uuid,
        approver_id: Uuid,
        approved: bool,
        comments: Option<String>,
    ) -> Result<ApprovalDecision, OrchestratorError> {
        let request = self
            .inner
            .approvals
            .resolve(approval_id, approver_id, approved, comments.as_deref())
            .await?;

        let execution = self
            .inner
            .checkpoint
            .load_execution(request.workflow_execution_id)
            .await?;
        let definition = self.get_workflow(execution.workflow_id).await?;
        // Still RUNNING on the gate: the run loop has not saved WAITING_APPROVAL
        // yet and applies the decision itself once it has.
        let suspending = execution.status == ExecutionStatus::Running
            && execution.current_step_id.as_deref() == Some(request.step_id.as_str());
        let status = match self.apply_decision(execution, &definition, &request).await? {
            ExecutionStatus::Running if suspending => decided_status(&definition, &request),
            status => status,
        };

        tracing::info!(
            approval_id = %approval_id,
            execution_id = %request.workflow_execution_id,
            approved,
            status = %status,
            "approval decided"
        );
        Ok(ApprovalDecision { status, approved })
    }

    /// Fail every execution whose open approval request is past its deadline.
    ///
    /// Returns the IDs of the executions marked FAILED.
    pub async fn sweep_expired_approvals(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, OrchestratorError> {
        let expired = self.inner.approvals.expired(now).await?;
        let mut failed = Vec::new();

        for request in expired {
            if !self.inner.approvals.expire(&request, now).await? {
                continue;
            }
            let resolved = ApprovalRequest {
                approver_id: None,
                approved: Some(false),
                comments: Some(APPROVAL_DEADLINE_EXCEEDED.to_string()),
                decided_at: Some(now),
                ..request
            };

            let execution = match self.inner.checkpoint.load_execution(resolved.workflow_execution_id).await {
                Ok(execution) => execution,
                Err(CheckpointError::ExecutionNotFound(id)) => {
                    tracing::warn!(approval_id = %resolved.id, execution_id = %id, "expired approval has no execution");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Some(definition) = self.inner.repo.get_definition(&execution.workflow_id).await? else {
                tracing::warn!(execution_id = %execution.id, "expired approval has no workflow definition");
                continue;
            };

            let execution_id = execution.id;
            if self.apply_decision(execution, &definition, &resolved).await? == ExecutionStatus::Failed {
                failed.push(execution_id);
            }
        }

        if !failed.is_empty() {
            tracing::info!(count = failed.len(), "expired approvals swept");
        }
        Ok(failed)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Pick up executions left in flight by a previous process.
    ///
    /// Must run before any run loop is active in this process (i.e. at
    /// startup). Stale `Pending` step records are closed as failed, except
    /// the record of an APPROVAL gate whose request already exists: those
    /// executions are parked in WAITING_APPROVAL instead of re-running the
    /// step. An execution waiting on a gate whose request was decided but
    /// never applied has the decision applied now.
    pub async fn recover_in_flight(&self) -> Result<RecoveryReport, OrchestratorError> {
        let waiting = self
            .inner
            .repo
            .list_executions_by_status(ExecutionStatus::WaitingApproval)
            .await?;
        let running = self
            .inner
            .repo
            .list_executions_by_status(ExecutionStatus::Running)
            .await?;
        let mut report = RecoveryReport::default();

        for execution in waiting {
            let Some(definition) = self.inner.repo.get_definition(&execution.workflow_id).await? else {
                tracing::warn!(execution_id = %execution.id, "waiting execution has no workflow definition");
                continue;
            };
            let Some(step_id) = execution.current_step_id.clone() else {
                continue;
            };
            let Some(request) = self.latest_gate_request(execution.id, &step_id).await? else {
                continue;
            };
            if request.is_open() {
                continue;
            }
            let execution_id = execution.id;
            self.apply_decision(execution, &definition, &request).await?;
            report.decided.push(execution_id);
        }

        for mut execution in running {
            let Some(definition) = self.inner.repo.get_definition(&execution.workflow_id).await? else {
                execution.finish(ExecutionStatus::Failed, Some("workflow definition missing".to_string()));
                self.inner.checkpoint.save_execution(&execution).await?;
                report.failed.push(execution.id);
                continue;
            };

            let history = self.inner.checkpoint.step_history(execution.id).await?;
            let gate = execution
                .current_step_id
                .as_deref()
                .and_then(|id| definition.step(id))
                .filter(|step| step.step_type == StepType::Approval);
            let gate_request = match gate {
                Some(step) => self.current_gate_request(execution.id, &step.id, &history).await?,
                None => None,
            };

            for mut record in history {
                if record.status != StepExecutionStatus::Pending {
                    continue;
                }
                match &gate_request {
                    Some(request) if record.step_id == request.step_id && record.parent_step_id.is_none() => {
                        let output = StepOutcome::Suspend { approval_id: request.id }.to_value();
                        self.inner.checkpoint.step_waiting_approval(&mut record, output).await?;
                    }
                    _ => self.inner.checkpoint.step_failed(&mut record, INTERRUPTED).await?,
                }
            }

            let Some(request) = gate_request else {
                report.resumed.push(execution.id);
                self.spawn_run(execution, definition);
                continue;
            };

            let mut parked = execution.clone();
            parked.status = ExecutionStatus::WaitingApproval;
            if !self
                .inner
                .checkpoint
                .transition_execution(&parked, ExecutionStatus::Running)
                .await?
            {
                continue;
            }
            if request.is_open() {
                report.suspended.push(execution.id);
            } else {
                self.apply_decision(parked, &definition, &request).await?;
                report.decided.push(execution.id);
            }
        }

        tracing::info!(
            resumed = report.resumed.len(),
            suspended = report.suspended.len(),
            decided = report.decided.len(),
            failed = report.failed.len(),
            "in-flight executions recovered"
        );
        Ok(report)
    }

    /// The most recent request raised by gate `step_id` of an execution.
    async fn latest_gate_request(
        &self,
        execution_id: Uuid,
        step_id: &str,
    ) -> Result<Option<ApprovalRequest>, OrchestratorError> {
        let requests = self.inner.approvals.for_execution(execution_id).await?;
        Ok(requests.into_iter().rev().find(|a| a.step_id == step_id))
    }

    /// The request raised by an interrupted visit to gate `step_id`, if the
    /// handler got far enough to create one.
    ///
    /// An open request always belongs to the current visit; a resolved one
    /// only when it was requested after the visit's pending record started.
    async fn current_gate_request(
        &self,
        execution_id: Uuid,
        step_id: &str,
        history: &[WorkflowStepExecution],
    ) -> Result<Option<ApprovalRequest>, OrchestratorError> {
        let Some(request) = self.latest_gate_request(execution_id, step_id).await? else {
            return Ok(None);
        };
        if request.is_open() {
            return Ok(Some(request));
        }
        let visit_started = history
            .iter()
            .filter(|r| {
                r.step_id == step_id && r.parent_step_id.is_none() && r.status == StepExecutionStatus::Pending
            })
            .map(|r| r.started_at)
            .max();
        Ok(visit_started
            .filter(|started| request.requested_at >= *started)
            .map(|_| request))
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    fn spawn_run(&self, execution: WorkflowExecution, definition: WorkflowDefinition) {
        let span = tracing::info_span!(
            "workflow_execution",
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id
        );
        let this = self.clone();
        let run: BoxFuture<'static, ()> = Box::pin(async move { this.drive(execution, definition).await });
        tokio::spawn(run.instrument(span));
    }

    async fn drive(self, mut execution: WorkflowExecution, definition: WorkflowDefinition) {
        if let Err(e) = self.advance(&mut execution, &definition).await {
            tracing::error!(execution_id = %execution.id, error = %e, "run loop aborted");
            if execution.status.is_terminal() {
                return;
            }
            execution.finish(ExecutionStatus::Failed, Some(e.to_string()));
            if let Err(save_err) = self.inner.checkpoint.save_execution(&execution).await {
                tracing::error!(
                    execution_id = %execution.id,
                    error = %save_err,
                    "failed to persist execution failure"
                );
            }
            self.notify(
                execution.workflow_id,
                event_type::EXECUTION_FAILED,
                json!({ "execution_id": execution.id, "error": e.to_string() }),
            )
            .await;
        }
    }

    async fn advance(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
    ) -> Result<(), OrchestratorError> {
        let retry = RetryController::new(definition.retry_policy.unwrap_or(self.inner.config.retry));
        let mut context = ExecutionContext::new(execution.context.clone(), self.inner.config.max_context_bytes);

        while let Some(step_id) = execution.current_step_id.clone() {
            let Some(step) = definition.step(&step_id) else {
                break;
            };
            tracing::debug!(step_id = %step.id, step_type = %step.step_type, "running step");

            match self.run_current(execution, definition, step, &mut context, retry).await {
                Ok(Advance::Next(next)) => {
                    self.notify(
                        definition.id,
                        event_type::STEP_COMPLETED,
                        json!({ "execution_id": execution.id, "step_id": step.id }),
                    )
                    .await;
                    execution.current_step_id = next.filter(|id| definition.has_step(id));
                    execution.context = context.snapshot();
                    if execution.current_step_id.is_some() {
                        self.inner.checkpoint.save_execution(execution).await?;
                    }
                }
                Ok(Advance::Suspended(approval_id)) => {
                    return self
                        .suspend(execution, definition, &context, step, approval_id)
                        .await;
                }
                Err(e) => {
                    self.notify(
                        definition.id,
                        event_type::STEP_FAILED,
                        json!({ "execution_id": execution.id, "step_id": step.id, "error": e.to_string() }),
                    )
                    .await;
                    return self.fail(execution, &context, e.to_string()).await;
                }
            }
        }

        execution.context = context.snapshot();
        execution.finish(ExecutionStatus::Completed, None);
        self.inner.checkpoint.save_execution(execution).await?;
        tracing::info!(execution_id = %execution.id, "execution completed");
        self.notify(
            definition.id,
            event_type::EXECUTION_COMPLETED,
            json!({ "execution_id": execution.id }),
        )
        .await;
        Ok(())
    }

    async fn run_current(
        &self,
        execution: &WorkflowExecution,
        definition: &WorkflowDefinition,
        step: &WorkflowStepDefinition,
        context: &mut ExecutionContext,
        retry: RetryController,
    ) -> Result<Advance, OrchestratorError> {
        if step.step_type == StepType::Parallel {
            let mut record = self
                .inner
                .checkpoint
                .step_started(execution.id, &step.id, None, context.snapshot())
                .await?;

            let joined = self
                .inner
                .parallel
                .run(definition.id, execution.id, step, definition, context, retry)
                .await;
            let outputs = match joined {
                Ok(outputs) => outputs,
                Err(e) => {
                    self.inner.checkpoint.step_failed(&mut record, &e.to_string()).await?;
                    return Err(e.into());
                }
            };

            let mut merged = ContextMap::new();
            for branch in &outputs {
                merged.insert(branch.step_id.clone(), Value::Object(branch.output.clone()));
            }
            if let Err(e) = context.merge(merged) {
                self.inner.checkpoint.step_failed(&mut record, &e.to_string()).await?;
                return Err(e.into());
            }

            self.inner
                .checkpoint
                .step_completed(&mut record, branch_outputs_value(&outputs))
                .await?;
            return Ok(Advance::Next(step.next_step_id.clone()));
        }

        let target = StepTarget {
            workflow_id: definition.id,
            execution_id: execution.id,
            step,
            parent_step_id: None,
            context: &*context,
        };
        let StepRun { outcome, .. } = self.inner.runner.run(target, &retry).await?;

        match outcome {
            StepOutcome::Output(output) => {
                context.merge(output)?;
                Ok(Advance::Next(step.next_step_id.clone()))
            }
            StepOutcome::Branch { next_step_id, output } => {
                context.merge(output)?;
                Ok(Advance::Next(next_step_id))
            }
            StepOutcome::Suspend { approval_id } => Ok(Advance::Suspended(approval_id)),
        }
    }

    async fn suspend(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        context: &ExecutionContext,
        step: &WorkflowStepDefinition,
        approval_id: Uuid,
    ) -> Result<(), OrchestratorError> {
        execution.status = ExecutionStatus::WaitingApproval;
        execution.context = context.snapshot();
        self.inner.checkpoint.save_execution(execution).await?;

        tracing::info!(
            execution_id = %execution.id,
            step_id = %step.id,
            approval_id = %approval_id,
            "execution waiting for approval"
        );
        self.notify(
            definition.id,
            event_type::APPROVAL_NEEDED,
            json!({ "execution_id": execution.id, "step_id": step.id, "approval_id": approval_id }),
        )
        .await;

        // A decision may have landed between the request being created and
        // the status reaching WAITING_APPROVAL.
        let request = self.inner.approvals.get(approval_id).await?;
        if !request.is_open() {
            self.apply_decision(execution.clone(), definition, &request).await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        execution: &mut WorkflowExecution,
        context: &ExecutionContext,
        error: String,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!(execution_id = %execution.id, error = %error, "execution failed");
        execution.context = context.snapshot();
        execution.finish(ExecutionStatus::Failed, Some(error.clone()));
        self.inner.checkpoint.save_execution(execution).await?;
        self.notify(
            execution.workflow_id,
            event_type::EXECUTION_FAILED,
            json!({ "execution_id": execution.id, "error": error }),
        )
        .await;
        Ok(())
    }

    /// Apply a resolved approval request to its execution.
    ///
    /// No-op unless the execution is WAITING_APPROVAL; the status write is a
    /// compare-and-set, so concurrent callers apply a decision at most once.
    /// Returns the execution's status afterwards.
    async fn apply_decision(
        &self,
        execution: WorkflowExecution,
        definition: &WorkflowDefinition,
        request: &ApprovalRequest,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        if execution.status != ExecutionStatus::WaitingApproval {
            return Ok(execution.status);
        }

        let approved = request.approved == Some(true);
        let timed_out = !approved && request.approver_id.is_none();
        let decision = json!({
            "approval_id": request.id,
            "approved": approved,
            "approver_id": request.approver_id,
            "comments": request.comments,
        });

        let mut next = execution.clone();
        if approved {
            let mut context = ExecutionContext::new(next.context.clone(), self.inner.config.max_context_bytes);
            context.insert(request.step_id.clone(), decision.clone())?;
            next.context = context.into_values();
            match gate_successor(definition, &request.step_id) {
                Some(step_id) => {
                    next.status = ExecutionStatus::Running;
                    next.current_step_id = Some(step_id);
                }
                None => next.finish(ExecutionStatus::Completed, None),
            }
        } else if timed_out {
            next.finish(ExecutionStatus::Failed, Some(APPROVAL_DEADLINE_EXCEEDED.to_string()));
        } else {
            next.finish(ExecutionStatus::Cancelled, None);
        }

        let gate_record = self
            .inner
            .checkpoint
            .find_step(execution.id, &request.step_id, StepExecutionStatus::WaitingApproval)
            .await?;

        if !self
            .inner
            .checkpoint
            .transition_execution(&next, ExecutionStatus::WaitingApproval)
            .await?
        {
            let current = self.inner.checkpoint.load_execution(execution.id).await?;
            return Ok(current.status);
        }

        if let Some(mut record) = gate_record {
            if approved {
                self.inner.checkpoint.step_completed(&mut record, decision.clone()).await?;
            } else if timed_out {
                self.inner
                    .checkpoint
                    .step_failed(&mut record, APPROVAL_DEADLINE_EXCEEDED)
                    .await?;
            } else {
                self.inner.checkpoint.step_cancelled(&mut record, decision.clone()).await?;
            }
        }

        self.notify(
            definition.id,
            event_type::APPROVAL_RESOLVED,
            json!({ "execution_id": execution.id, "step_id": request.step_id, "decision": decision }),
        )
        .await;

        match next.status {
            ExecutionStatus::Running => self.spawn_run(next.clone(), definition.clone()),
            ExecutionStatus::Cancelled => {
                self.notify(
                    definition.id,
                    event_type::EXECUTION_CANCELLED,
                    json!({ "execution_id": execution.id }),
                )
                .await;
            }
            ExecutionStatus::Failed => {
                self.notify(
                    definition.id,
                    event_type::EXECUTION_FAILED,
                    json!({ "execution_id": execution.id, "error": APPROVAL_DEADLINE_EXCEEDED }),
                )
                .await;
            }
            ExecutionStatus::Completed => {
                self.notify(
                    definition.id,
                    event_type::EXECUTION_COMPLETED,
                    json!({ "execution_id": execution.id }),
                )
                .await;
            }
            ExecutionStatus::Draft | ExecutionStatus::WaitingApproval => {}
        }

        Ok(next.status)
    }

    /// Publish a notification. Failures are logged and never escalate.
    async fn notify(&self, workflow_id: Uuid, event_type: &str, payload: Value) {
        let topic = workflow_topic(workflow_id);
        if let Err(e) = self.inner.notifier.publish(&topic, event_type, payload).await {
            tracing::warn!(topic = %topic, event_type, error = %e, "notification failed");
        }
    }
}

/// The step after approval gate `step_id`, if it names a defined step.
fn gate_successor(definition: &WorkflowDefinition, step_id: &str) -> Option<String> {
    definition
        .step(step_id)
        .and_then(|s| s.next_step_id.clone())
        .filter(|id| definition.has_step(id))
}

/// Status an execution ends up in once resolved `request` is applied.
fn decided_status(definition: &WorkflowDefinition, request: &ApprovalRequest) -> ExecutionStatus {
    match request.approved {
        Some(true) if gate_successor(definition, &request.step_id).is_some() => ExecutionStatus::Running,
        Some(true) => ExecutionStatus::Completed,
        _ if request.approver_id.is_none() => ExecutionStatus::Failed,
        _ => ExecutionStatus::Cancelled,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
