//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `flowgate-core` using sqlx with split
//! read/write pools. Definitions are stored as JSON blobs with their
//! lifecycle columns (`is_active`, `updated_at`) kept alongside; executions,
//! step records and approval requests are stored column-per-field with JSON
//! text for context maps and outputs. Status transitions and approval
//! decisions are conditional UPDATEs, so the single writer connection
//! serializes racing callers.

use chrono::{DateTime, SecondsFormat, Utc};
use flowgate_core::repository::workflow::WorkflowRepository;
use flowgate_types::error::RepositoryError;
use flowgate_types::workflow::{
    ApprovalRequest, ContextMap, ExecutionStatus, StepExecutionStatus, WorkflowDefinition,
    WorkflowExecution, WorkflowStepExecution,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    definition: String,
    is_active: bool,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
            is_active: row.try_get("is_active")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let mut def: WorkflowDefinition = serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))?;
        def.is_active = self.is_active;
        def.updated_at = parse_datetime(&self.updated_at)?;
        Ok(def)
    }
}

struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    current_step_id: Option<String>,
    context: String,
    initiated_by: String,
    started_at: String,
    completed_at: Option<String>,
    error: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            current_step_id: row.try_get("current_step_id")?,
            context: row.try_get("context")?,
            initiated_by: row.try_get("initiated_by")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            status: self
                .status
                .parse::<ExecutionStatus>()
                .map_err(RepositoryError::Query)?,
            current_step_id: self.current_step_id,
            context: parse_map(&self.context, "context")?,
            initiated_by: parse_uuid(&self.initiated_by)?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            error: self.error,
            step_executions: Vec::new(),
        })
    }
}

struct StepExecutionRow {
    id: String,
    workflow_execution_id: String,
    step_id: String,
    parent_step_id: Option<String>,
    status: String,
    input_snapshot: String,
    output_data: Option<String>,
    error: Option<String>,
    retry_count: i64,
    started_at: String,
    completed_at: Option<String>,
}

impl StepExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_execution_id: row.try_get("workflow_execution_id")?,
            step_id: row.try_get("step_id")?,
            parent_step_id: row.try_get("parent_step_id")?,
            status: row.try_get("status")?,
            input_snapshot: row.try_get("input_snapshot")?,
            output_data: row.try_get("output_data")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_step_execution(self) -> Result<WorkflowStepExecution, RepositoryError> {
        let output_data = self
            .output_data
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))
            })
            .transpose()?;

        Ok(WorkflowStepExecution {
            id: parse_uuid(&self.id)?,
            workflow_execution_id: parse_uuid(&self.workflow_execution_id)?,
            step_id: self.step_id,
            parent_step_id: self.parent_step_id,
            status: self
                .status
                .parse::<StepExecutionStatus>()
                .map_err(RepositoryError::Query)?,
            input_snapshot: parse_map(&self.input_snapshot, "input_snapshot")?,
            output_data,
            error: self.error,
            retry_count: u32::try_from(self.retry_count)
                .map_err(|_| RepositoryError::Query(format!("invalid retry_count: {}", self.retry_count)))?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
        })
    }
}

struct ApprovalRow {
    id: String,
    workflow_execution_id: String,
    step_id: String,
    data_to_approve: String,
    approver_id: Option<String>,
    approved: Option<bool>,
    comments: Option<String>,
    requested_at: String,
    decided_at: Option<String>,
    deadline: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_execution_id: row.try_get("workflow_execution_id")?,
            step_id: row.try_get("step_id")?,
            data_to_approve: row.try_get("data_to_approve")?,
            approver_id: row.try_get("approver_id")?,
            approved: row.try_get("approved")?,
            comments: row.try_get("comments")?,
            requested_at: row.try_get("requested_at")?,
            decided_at: row.try_get("decided_at")?,
            deadline: row.try_get("deadline")?,
        })
    }

    fn into_approval(self) -> Result<ApprovalRequest, RepositoryError> {
        Ok(ApprovalRequest {
            id: parse_uuid(&self.id)?,
            workflow_execution_id: parse_uuid(&self.workflow_execution_id)?,
            step_id: self.step_id,
            data_to_approve: parse_map(&self.data_to_approve, "data_to_approve")?,
            approver_id: self.approver_id.as_deref().map(parse_uuid).transpose()?,
            approved: self.approved,
            comments: self.comments,
            requested_at: parse_datetime(&self.requested_at)?,
            decided_at: parse_opt_datetime(self.decided_at.as_deref())?,
            deadline: parse_opt_datetime(self.deadline.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_opt_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_map(s: &str, column: &str) -> Result<ContextMap, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        _ => RepositoryError::Query(e.to_string()),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

impl SqliteWorkflowRepository {
    async fn execution_exists(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def)?;

        sqlx::query(
            r#"INSERT INTO workflows (id, name, organization_id, is_active, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 organization_id = excluded.organization_id,
                 is_active = excluded.is_active,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(def.organization_id.to_string())
        .bind(def.is_active)
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition, is_active, updated_at FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| {
            DefinitionRow::from_row(&row)
                .map_err(query_error)?
                .into_definition()
        })
        .transpose()
    }

    async fn list_definitions(
        &self,
        organization_id: Option<&Uuid>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = match organization_id {
            Some(org) => {
                sqlx::query(
                    "SELECT definition, is_active, updated_at FROM workflows WHERE organization_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(org.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT definition, is_active, updated_at FROM workflows ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            defs.push(DefinitionRow::from_row(row).map_err(query_error)?.into_definition()?);
        }
        Ok(defs)
    }

    async fn deactivate_definition(
        &self,
        id: &Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(format_datetime(&updated_at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, workflow_id, status, current_step_id, context, initiated_by, started_at, completed_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.current_step_id)
        .bind(to_json(&execution.context)?)
        .bind(execution.initiated_by.to_string())
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("execution {} already exists", execution.id))
            } else {
                query_error(e)
            }
        })?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_executions
               SET status = ?, current_step_id = ?, context = ?, completed_at = ?, error = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_step_id)
        .bind(to_json(&execution.context)?)
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn transition_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_executions
               SET status = ?, current_step_id = ?, context = ?, completed_at = ?, error = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_step_id)
        .bind(to_json(&execution.context)?)
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&execution.error)
        .bind(execution.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.execution_exists(&execution.id).await? {
            return Err(RepositoryError::NotFound);
        }
        Ok(false)
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| ExecutionRow::from_row(&row).map_err(query_error)?.into_execution())
            .transpose()
    }

    async fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE status = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut execs = Vec::with_capacity(rows.len());
        for row in &rows {
            execs.push(ExecutionRow::from_row(row).map_err(query_error)?.into_execution()?);
        }
        Ok(execs)
    }

    async fn create_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        let output_data = step.output_data.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO workflow_step_executions
               (id, workflow_execution_id, step_id, parent_step_id, status, input_snapshot,
                output_data, error, retry_count, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.workflow_execution_id.to_string())
        .bind(&step.step_id)
        .bind(&step.parent_step_id)
        .bind(step.status.as_str())
        .bind(to_json(&step.input_snapshot)?)
        .bind(&output_data)
        .bind(&step.error)
        .bind(i64::from(step.retry_count))
        .bind(format_datetime(&step.started_at))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn update_step_execution(&self, step: &WorkflowStepExecution) -> Result<(), RepositoryError> {
        let output_data = step.output_data.as_ref().map(to_json).transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_step_executions
               SET status = ?, output_data = ?, error = ?, retry_count = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(step.status.as_str())
        .bind(&output_data)
        .bind(&step.error)
        .bind(i64::from(step.retry_count))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .bind(step.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowStepExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_step_executions WHERE workflow_execution_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            steps.push(
                StepExecutionRow::from_row(row)
                    .map_err(query_error)?
                    .into_step_execution()?,
            );
        }
        Ok(steps)
    }

    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO approval_requests
               (id, workflow_execution_id, step_id, data_to_approve, approver_id, approved,
                comments, requested_at, decided_at, deadline)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(approval.id.to_string())
        .bind(approval.workflow_execution_id.to_string())
        .bind(&approval.step_id)
        .bind(to_json(&approval.data_to_approve)?)
        .bind(approval.approver_id.map(|id| id.to_string()))
        .bind(approval.approved)
        .bind(&approval.comments)
        .bind(format_datetime(&approval.requested_at))
        .bind(approval.decided_at.as_ref().map(format_datetime))
        .bind(approval.deadline.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "execution {} already has an open approval",
                    approval.workflow_execution_id
                ))
            } else {
                query_error(e)
            }
        })?;

        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|row| ApprovalRow::from_row(&row).map_err(query_error)?.into_approval())
            .transpose()
    }

    async fn resolve_approval(
        &self,
        id: &Uuid,
        approver_id: Option<Uuid>,
        approved: bool,
        comments: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET approved = ?, approver_id = ?, comments = ?, decided_at = ?
               WHERE id = ? AND approved IS NULL"#,
        )
        .bind(approved)
        .bind(approver_id.map(|id| id.to_string()))
        .bind(comments)
        .bind(format_datetime(&decided_at))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_open_approval(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM approval_requests WHERE workflow_execution_id = ? AND approved IS NULL",
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        row.map(|row| ApprovalRow::from_row(&row).map_err(query_error)?.into_approval())
            .transpose()
    }

    async fn list_open_approvals(&self) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE approved IS NULL ORDER BY requested_at ASC, id ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut open = Vec::with_capacity(rows.len());
        for row in &rows {
            open.push(ApprovalRow::from_row(row).map_err(query_error)?.into_approval()?);
        }
        Ok(open)
    }
    async fn list_approvals_for_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM approval_requests WHERE workflow_execution_id = ? ORDER BY requested_at ASC, id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut approvals = Vec::with_capacity(rows.len());
        for row in &rows {
            approvals.push(ApprovalRow::from_row(row).map_err(query_error)?.into_approval()?);
        }
        Ok(approvals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
