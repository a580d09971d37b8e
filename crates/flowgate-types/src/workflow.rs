//! Workflow domain types for Flowgate.
//!
//! Definitions (`WorkflowDefinition`, `WorkflowStepDefinition`) describe the
//! step graph an author publishes. Execution tracking types
//! (`WorkflowExecution`, `WorkflowStepExecution`, `ApprovalRequest`) are the
//! durable records the orchestrator writes as an execution moves through its
//! state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Key/value state threaded through an execution.
pub type ContextMap = Map<String, Value>;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A published workflow: the reusable graph of steps.
///
/// Definitions are immutable once active. Retiring a definition flips
/// `is_active` to false; new versions are new definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned at creation.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning organization.
    pub organization_id: Uuid,
    /// Step definitions, unique by `id`.
    pub steps: Vec<WorkflowStepDefinition>,
    /// ID of the first step executed.
    pub start_step_id: String,
    /// Author of the definition.
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Inactive definitions reject new executions.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Backoff policy for retried steps (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl WorkflowDefinition {
    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&WorkflowStepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether a step with the given ID exists.
    pub fn has_step(&self, id: &str) -> bool {
        self.step(id).is_some()
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A typed node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepDefinition {
    /// Step ID, unique within the workflow.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Per-type configuration (agent_id, template, true_step_id, ...).
    #[serde(default)]
    pub config: ContextMap,
    /// Successor for every type except CONDITION.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    /// Branch predicate for CONDITION steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Predicate>,
    /// Ordered sibling steps fanned out by a PARALLEL step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_step_ids: Vec<String>,
    /// Per-attempt timeout; for APPROVAL steps, the decision deadline. 0 disables.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Additional attempts after the first failure.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_retry_count() -> u32 {
    3
}

/// The kind of step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Agent,
    Condition,
    Parallel,
    Approval,
    Transform,
    ApiCall,
}

impl StepType {
    /// Step types wrapped by the retry controller.
    pub fn is_retryable(self) -> bool {
        matches!(self, StepType::Agent | StepType::ApiCall | StepType::Transform)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Agent => "agent",
            StepType::Condition => "condition",
            StepType::Parallel => "parallel",
            StepType::Approval => "approval",
            StepType::Transform => "transform",
            StepType::ApiCall => "api_call",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Structured branch predicate evaluated against the execution context.
///
/// `field` is a dotted path into the context (`customer.region`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    GreaterThan { field: String, value: Value },
    GreaterOrEqual { field: String, value: Value },
    LessThan { field: String, value: Value },
    LessOrEqual { field: String, value: Value },
    /// String containment, or membership for arrays.
    Contains { field: String, value: Value },
    /// True when the field is present and not null.
    Exists { field: String },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff parameters for retried steps.
///
/// Delay before retry `n` (1-based) is `min(base * 2^n, max)`, spread by
/// `±jitter` (a fraction of the delay).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Lifecycle placeholder; executions are never stored in this state.
    Draft,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Draft => "draft",
            ExecutionStatus::Running => "running",
            ExecutionStatus::WaitingApproval => "waiting_approval",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ExecutionStatus::Draft),
            "running" => Ok(ExecutionStatus::Running),
            "waiting_approval" => Ok(ExecutionStatus::WaitingApproval),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Status of a single step attempt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionStatus {
    Pending,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl StepExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepExecutionStatus::Pending => "pending",
            StepExecutionStatus::WaitingApproval => "waiting_approval",
            StepExecutionStatus::Completed => "completed",
            StepExecutionStatus::Failed => "failed",
            StepExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for StepExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepExecutionStatus::Pending),
            "waiting_approval" => Ok(StepExecutionStatus::WaitingApproval),
            "completed" => Ok(StepExecutionStatus::Completed),
            "failed" => Ok(StepExecutionStatus::Failed),
            "cancelled" => Ok(StepExecutionStatus::Cancelled),
            other => Err(format!("invalid step execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Null in terminal states; a valid step ID otherwise.
    #[serde(default)]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub context: ContextMap,
    pub initiated_by: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason for FAILED executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Audit trail, populated when the execution is read back.
    #[serde(default)]
    pub step_executions: Vec<WorkflowStepExecution>,
}

impl WorkflowExecution {
    /// Move into a terminal state, clearing the current step.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.status = status;
        self.current_step_id = None;
        self.completed_at = Some(Utc::now());
        self.error = error;
    }
}

/// Audit record for one step of an execution (including its retries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepExecution {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub step_id: String,
    /// The PARALLEL step that fanned this branch out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    pub status: StepExecutionStatus,
    /// Context at step entry.
    #[serde(default)]
    pub input_snapshot: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries performed (never more than the step's `retry_count`).
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A human decision point that suspends an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub workflow_execution_id: Uuid,
    pub step_id: String,
    /// Context snapshot presented to the approver.
    #[serde(default)]
    pub data_to_approve: ContextMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<Uuid>,
    /// `None` while pending.
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// After this instant the timeout sweep fails the execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_open(&self) -> bool {
        self.approved.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.deadline.is_some_and(|d| d < now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_definition_defaults() {
        let step: WorkflowStepDefinition = serde_json::from_value(json!({
            "id": "fetch",
            "name": "Fetch",
            "type": "agent",
            "config": { "agent_id": "researcher" }
        }))
        .unwrap();

        assert_eq!(step.step_type, StepType::Agent);
        assert_eq!(step.timeout_seconds, 300);
        assert_eq!(step.retry_count, 3);
        assert!(step.parallel_step_ids.is_empty());
        assert!(step.next_step_id.is_none());
    }

    #[test]
    fn step_type_wire_names() {
        assert_eq!(serde_json::to_value(StepType::ApiCall).unwrap(), json!("api_call"));
        let parsed: StepType = serde_json::from_value(json!("parallel")).unwrap();
        assert_eq!(parsed, StepType::Parallel);
    }

    #[test]
    fn predicate_is_tagged_by_op() {
        let p: Predicate = serde_json::from_value(json!({
            "op": "and",
            "all": [
                { "op": "equals", "field": "region", "value": "EU" },
                { "op": "not", "predicate": { "op": "exists", "field": "blocked" } }
            ]
        }))
        .unwrap();

        match p {
            Predicate::And { all } => {
                assert_eq!(all.len(), 2);
                assert!(matches!(all[1], Predicate::Not { .. }));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn execution_status_terminality() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::WaitingApproval.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn execution_status_parses_its_own_display() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::WaitingApproval,
            ExecutionStatus::Cancelled,
        ] {
            let parsed: ExecutionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn finish_clears_current_step() {
        let mut exec = WorkflowExecution {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            status: ExecutionStatus::Running,
            current_step_id: Some("fetch".to_string()),
            context: ContextMap::new(),
            initiated_by: Uuid::now_v7(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            step_executions: Vec::new(),
        };

        exec.finish(ExecutionStatus::Failed, Some("boom".to_string()));
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert!(exec.current_step_id.is_none());
        assert!(exec.completed_at.is_some());
        assert_eq!(exec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn approval_expiry_requires_open_request_and_deadline() {
        let now = Utc::now();
        let mut req = ApprovalRequest {
            id: Uuid::now_v7(),
            workflow_execution_id: Uuid::now_v7(),
            step_id: "review".to_string(),
            data_to_approve: ContextMap::new(),
            approver_id: None,
            approved: None,
            comments: None,
            requested_at: now - chrono::Duration::seconds(120),
            decided_at: None,
            deadline: None,
        };
        assert!(!req.is_expired(now));

        req.deadline = Some(now - chrono::Duration::seconds(1));
        assert!(req.is_expired(now));

        req.approved = Some(true);
        assert!(!req.is_expired(now));
    }

    #[test]
    fn retry_policy_defaults_from_empty_object() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.base_delay_ms, 1_000);
    }
}
