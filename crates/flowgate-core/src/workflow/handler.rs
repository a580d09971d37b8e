//! Step handler trait and per-type registry.
//!
//! A handler receives the step definition and the execution's current context
//! and returns a result map to merge, a branch decision, or a suspension
//! signal. The registry maps `StepType` to a shared handler and lets callers
//! replace the built-ins.

use std::collections::HashMap;
use std::sync::Arc;

use flowgate_types::workflow::{ContextMap, StepType, WorkflowStepDefinition};
use serde_json::Value;
use uuid::Uuid;

use crate::collaborator::BoxFuture;

use super::context::{ContextError, ExecutionContext};

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Successful result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Key/values merged into the execution context.
    Output(ContextMap),
    /// CONDITION result: the chosen successor plus the merged output.
    Branch {
        next_step_id: Option<String>,
        output: ContextMap,
    },
    /// The execution must wait for an external approval decision.
    Suspend { approval_id: Uuid },
}

impl StepOutcome {
    /// JSON recorded as the step execution's `output_data`.
    pub fn to_value(&self) -> Value {
        match self {
            StepOutcome::Output(map) | StepOutcome::Branch { output: map, .. } => {
                Value::Object(map.clone())
            }
            StepOutcome::Suspend { approval_id } => {
                serde_json::json!({ "waiting_approval": true, "approval_id": approval_id })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that can occur during step execution.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Handler or collaborator failure. Retryable.
    #[error("step execution failed: {0}")]
    Execution(String),

    /// Attempt exceeded the step's timeout. Retryable.
    #[error("step timed out after {0}s")]
    Timeout(u64),

    /// TRANSFORM failure (missing template field). Never retried.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Template rendering failed outside TRANSFORM. Never retried.
    #[error("template error: {0}")]
    Template(String),

    /// Step configuration is unusable. Never retried.
    #[error("invalid step configuration: {0}")]
    Config(String),
}

impl StepError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Execution(_) | StepError::Timeout(_))
    }
}

impl From<ContextError> for StepError {
    fn from(err: ContextError) -> Self {
        StepError::Template(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// StepHandler
// ---------------------------------------------------------------------------

/// Everything a handler sees for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub step: &'a WorkflowStepDefinition,
    pub context: &'a ExecutionContext,
}

/// Executes one step type.
pub trait StepHandler: Send + Sync {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>>;
}

// ---------------------------------------------------------------------------
// StepHandlerRegistry
// ---------------------------------------------------------------------------

/// Maps step types to their handlers.
#[derive(Clone, Default)]
pub struct StepHandlerRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a step type.
    pub fn register(&mut self, step_type: StepType, handler: Arc<dyn StepHandler>) {
        if self.handlers.insert(step_type, handler).is_some() {
            tracing::debug!(step_type = %step_type, "replaced step handler");
        }
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.handlers.contains_key(&step_type)
    }
}

impl std::fmt::Debug for StepHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("StepHandlerRegistry")
            .field("types", &types)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Required string entry in a step's config.
pub fn config_str<'a>(step: &'a WorkflowStepDefinition, key: &str) -> Result<&'a str, StepError> {
    step.config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::Config(format!("step '{}' requires string config.{key}", step.id)))
}

/// Optional string entry in a step's config.
pub fn config_opt_str<'a>(step: &'a WorkflowStepDefinition, key: &str) -> Option<&'a str> {
    step.config.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(&'static str);

    impl StepHandler for Fixed {
        fn handle<'a>(
            &'a self,
            _input: StepInput<'a>,
        ) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
            Box::pin(async move {
                let mut out = ContextMap::new();
                out.insert("by".to_string(), json!(self.0));
                Ok(StepOutcome::Output(out))
            })
        }
    }

    #[test]
    fn retryability_by_variant() {
        assert!(StepError::Execution("503".into()).is_retryable());
        assert!(StepError::Timeout(5).is_retryable());
        assert!(!StepError::Transform("missing".into()).is_retryable());
        assert!(!StepError::Template("missing".into()).is_retryable());
        assert!(!StepError::Config("agent_id".into()).is_retryable());
    }

    #[test]
    fn register_replaces_existing_handler() {
        let mut registry = StepHandlerRegistry::new();
        registry.register(StepType::Agent, Arc::new(Fixed("first")));
        registry.register(StepType::Agent, Arc::new(Fixed("second")));

        assert!(registry.contains(StepType::Agent));
        assert!(!registry.contains(StepType::Transform));
        assert!(format!("{registry:?}").contains("agent"));
    }

    #[tokio::test]
    async fn registered_handler_is_invoked() {
        let mut registry = StepHandlerRegistry::new();
        registry.register(StepType::Agent, Arc::new(Fixed("second")));

        let step: WorkflowStepDefinition = serde_json::from_value(json!({
            "id": "a", "name": "A", "type": "agent"
        }))
        .unwrap();
        let ctx = ExecutionContext::new(ContextMap::new(), 1024);
        let input = StepInput {
            workflow_id: Uuid::nil(),
            execution_id: Uuid::nil(),
            step: &step,
            context: &ctx,
        };

        let outcome = registry
            .get(StepType::Agent)
            .unwrap()
            .handle(input)
            .await
            .unwrap();
        assert_eq!(outcome.to_value(), json!({ "by": "second" }));
    }

    #[test]
    fn suspend_outcome_value() {
        let id = Uuid::nil();
        let value = StepOutcome::Suspend { approval_id: id }.to_value();
        assert_eq!(value["waiting_approval"], json!(true));
    }
}
