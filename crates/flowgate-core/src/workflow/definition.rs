//! Workflow definition drafts and structural validation.
//!
//! A `WorkflowDraft` is what authors submit; `validate_draft` checks it
//! before the orchestrator turns it into an active `WorkflowDefinition`.
//! Validation is synchronous and rejects dangling step references, bad
//! per-type config, and unsupported parallel branch types.

use std::collections::HashSet;

use chrono::Utc;
use flowgate_types::workflow::{RetryPolicy, StepType, WorkflowDefinition, WorkflowStepDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Step types allowed as PARALLEL branches.
pub const PARALLEL_BRANCH_TYPES: [StepType; 3] =
    [StepType::Agent, StepType::Transform, StepType::ApiCall];

/// HTTP methods accepted by API_CALL steps.
const API_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

// ---------------------------------------------------------------------------
// WorkflowDraft
// ---------------------------------------------------------------------------

/// Input to `create_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub organization_id: Uuid,
    pub steps: Vec<WorkflowStepDefinition>,
    pub start_step_id: String,
    pub created_by: Uuid,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl WorkflowDraft {
    /// Build an active definition with a fresh ID and timestamps.
    pub fn into_definition(self) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: self.name,
            description: self.description,
            organization_id: self.organization_id,
            steps: self.steps,
            start_step_id: self.start_step_id,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
            is_active: true,
            tags: self.tags,
            retry_policy: self.retry_policy,
        }
    }
}

// ---------------------------------------------------------------------------
// DefinitionError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DefinitionError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow has no steps")]
    NoSteps,

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("start step '{0}' is not defined")]
    UnknownStartStep(String),

    #[error("step '{step}' references undefined step '{target}' in {field}")]
    DanglingReference {
        step: String,
        field: &'static str,
        target: String,
    },

    #[error("parallel step '{0}' has no branches")]
    EmptyParallel(String),

    #[error("parallel step '{0}' lists itself as a branch")]
    SelfReferencingParallel(String),

    #[error("branch '{branch}' of parallel step '{step}' is a {step_type} step; only agent, transform and api_call steps can run in parallel")]
    UnsupportedBranchType {
        step: String,
        branch: String,
        step_type: StepType,
    },

    #[error("condition step '{0}' has no predicate")]
    MissingPredicate(String),

    #[error("step '{step}' is missing config.{key}")]
    MissingConfig { step: String, key: &'static str },

    #[error("step '{step}' has invalid config.{key}: {reason}")]
    InvalidConfig {
        step: String,
        key: &'static str,
        reason: String,
    },

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a draft. Returns the first problem found.
pub fn validate_draft(draft: &WorkflowDraft) -> Result<(), DefinitionError> {
    if draft.name.trim().is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    if let Some(policy) = &draft.retry_policy {
        validate_retry_policy(policy)?;
    }
    validate_steps(&draft.steps, &draft.start_step_id)
}

/// Validate the step graph of a definition.
pub fn validate_steps(steps: &[WorkflowStepDefinition], start_step_id: &str) -> Result<(), DefinitionError> {
    if steps.is_empty() {
        return Err(DefinitionError::NoSteps);
    }

    let mut ids = HashSet::with_capacity(steps.len());
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(DefinitionError::DuplicateStepId(step.id.clone()));
        }
    }

    if !ids.contains(start_step_id) {
        return Err(DefinitionError::UnknownStartStep(start_step_id.to_string()));
    }

    let check_ref = |step: &WorkflowStepDefinition, field: &'static str, target: &str| {
        if ids.contains(target) {
            Ok(())
        } else {
            Err(DefinitionError::DanglingReference {
                step: step.id.clone(),
                field,
                target: target.to_string(),
            })
        }
    };

    for step in steps {
        if let Some(next) = &step.next_step_id {
            check_ref(step, "next_step_id", next)?;
        }

        match step.step_type {
            StepType::Agent => {
                require_str(step, "agent_id")?;
                optional_str(step, "prompt_template")?;
                optional_str(step, "output_key")?;
            }
            StepType::Transform => match require_str(step, "transform_type")? {
                "extract" => {
                    require_str(step, "field")?;
                    optional_str(step, "as")?;
                }
                "format" => {
                    require_str(step, "template")?;
                    optional_str(step, "output_key")?;
                }
                other => {
                    return Err(DefinitionError::InvalidConfig {
                        step: step.id.clone(),
                        key: "transform_type",
                        reason: format!("expected 'extract' or 'format', got '{other}'"),
                    });
                }
            },
            StepType::ApiCall => {
                require_str(step, "url")?;
                if let Some(method) = optional_str(step, "method")? {
                    let upper = method.to_ascii_uppercase();
                    if !API_METHODS.contains(&upper.as_str()) {
                        return Err(DefinitionError::InvalidConfig {
                            step: step.id.clone(),
                            key: "method",
                            reason: format!("unsupported method '{method}'"),
                        });
                    }
                }
                if let Some(headers) = step.config.get("headers") {
                    let valid = headers
                        .as_object()
                        .is_some_and(|map| map.values().all(Value::is_string));
                    if !valid {
                        return Err(DefinitionError::InvalidConfig {
                            step: step.id.clone(),
                            key: "headers",
                            reason: "expected an object of string values".to_string(),
                        });
                    }
                }
            }
            StepType::Condition => {
                if step.condition.is_none() {
                    return Err(DefinitionError::MissingPredicate(step.id.clone()));
                }
                if let Some(target) = optional_str(step, "true_step_id")? {
                    check_ref(step, "config.true_step_id", target)?;
                }
                if let Some(target) = optional_str(step, "false_step_id")? {
                    check_ref(step, "config.false_step_id", target)?;
                }
            }
            StepType::Parallel => {
                if step.parallel_step_ids.is_empty() {
                    return Err(DefinitionError::EmptyParallel(step.id.clone()));
                }
                for branch_id in &step.parallel_step_ids {
                    if *branch_id == step.id {
                        return Err(DefinitionError::SelfReferencingParallel(step.id.clone()));
                    }
                    check_ref(step, "parallel_step_ids", branch_id)?;
                    let branch = steps
                        .iter()
                        .find(|s| s.id == *branch_id)
                        .map(|s| s.step_type);
                    if let Some(step_type) = branch {
                        if !PARALLEL_BRANCH_TYPES.contains(&step_type) {
                            return Err(DefinitionError::UnsupportedBranchType {
                                step: step.id.clone(),
                                branch: branch_id.clone(),
                                step_type,
                            });
                        }
                    }
                }
            }
            StepType::Approval => {}
        }
    }

    Ok(())
}

fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), DefinitionError> {
    if !(0.0..=1.0).contains(&policy.jitter) {
        return Err(DefinitionError::InvalidRetryPolicy(format!(
            "jitter must be within 0.0..=1.0, got {}",
            policy.jitter
        )));
    }
    if policy.base_delay_ms > policy.max_delay_ms {
        return Err(DefinitionError::InvalidRetryPolicy(format!(
            "base_delay_ms ({}) exceeds max_delay_ms ({})",
            policy.base_delay_ms, policy.max_delay_ms
        )));
    }
    Ok(())
}

fn require_str<'a>(step: &'a WorkflowStepDefinition, key: &'static str) -> Result<&'a str, DefinitionError> {
    optional_str(step, key)?.ok_or_else(|| DefinitionError::MissingConfig {
        step: step.id.clone(),
        key,
    })
}

fn optional_str<'a>(
    step: &'a WorkflowStepDefinition,
    key: &'static str,
) -> Result<Option<&'a str>, DefinitionError> {
    match step.config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(DefinitionError::InvalidConfig {
            step: step.id.clone(),
            key,
            reason: "expected a string".to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
