//! Built-in handlers for AGENT, TRANSFORM, API_CALL and CONDITION steps.
//!
//! APPROVAL lives in `approval` because it needs the repository; PARALLEL is
//! driven by the fan-out coordinator rather than a handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowgate_types::workflow::ContextMap;
use serde_json::{Value, json};

use crate::collaborator::{ApiClient, ApiRequest, BoxFuture, TaskExecutor};

use super::condition;
use super::context::ContextError;
use super::handler::{StepError, StepHandler, StepInput, StepOutcome, config_opt_str, config_str};

// ---------------------------------------------------------------------------
// AGENT
// ---------------------------------------------------------------------------

/// Invokes the task-execution collaborator with a rendered prompt.
///
/// Output: `{agent_id, agent_response, agent_metadata}`, nested under
/// `config.output_key` when set.
pub struct AgentHandler {
    executor: Arc<dyn TaskExecutor>,
}

impl AgentHandler {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self { executor }
    }
}

impl StepHandler for AgentHandler {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            let step = input.step;
            let agent_id = config_str(step, "agent_id")?;
            let template = config_opt_str(step, "prompt_template").unwrap_or_default();
            let prompt = input.context.render(template)?;

            tracing::debug!(step_id = %step.id, agent_id, "invoking agent");

            let response = self
                .executor
                .invoke(agent_id, &prompt, input.context.values())
                .await
                .map_err(|e| StepError::Execution(e.to_string()))?;

            let mut result = ContextMap::new();
            result.insert("agent_id".to_string(), json!(agent_id));
            result.insert("agent_response".to_string(), response.output);
            result.insert("agent_metadata".to_string(), Value::Object(response.metadata));

            Ok(StepOutcome::Output(nest(config_opt_str(step, "output_key"), result)))
        })
    }
}

// ---------------------------------------------------------------------------
// TRANSFORM
// ---------------------------------------------------------------------------

/// Pure data reshaping: `extract` copies a field, `format` renders a template.
#[derive(Debug, Default)]
pub struct TransformHandler;

impl StepHandler for TransformHandler {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            let step = input.step;
            let mut result = ContextMap::new();

            match config_str(step, "transform_type")? {
                "extract" => {
                    let field = config_str(step, "field")?;
                    let key = config_opt_str(step, "as")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("extracted_{field}"));
                    let value = input.context.lookup(field).cloned().unwrap_or(Value::Null);
                    result.insert(key, value);
                }
                "format" => {
                    let template = config_str(step, "template")?;
                    let rendered = input.context.render(template).map_err(|e| match e {
                        ContextError::MissingField(field) => {
                            StepError::Transform(format!("template field '{field}' not in context"))
                        }
                        other => StepError::Transform(other.to_string()),
                    })?;
                    let key = config_opt_str(step, "output_key").unwrap_or("formatted_output");
                    result.insert(key.to_string(), Value::String(rendered));
                }
                other => {
                    return Err(StepError::Config(format!(
                        "step '{}' has unknown transform_type '{other}'",
                        step.id
                    )));
                }
            }

            Ok(StepOutcome::Output(result))
        })
    }
}

// ---------------------------------------------------------------------------
// API_CALL
// ---------------------------------------------------------------------------

/// Renders `method`, `url`, `headers` and `body` and hands them to the API
/// collaborator. Non-2xx responses are retryable failures.
pub struct ApiCallHandler {
    client: Arc<dyn ApiClient>,
}

impl ApiCallHandler {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    fn build_request(input: &StepInput<'_>) -> Result<ApiRequest, StepError> {
        let step = input.step;
        let ctx = input.context;

        let method = config_opt_str(step, "method").unwrap_or("GET").to_ascii_uppercase();
        let url = ctx.render(config_str(step, "url")?)?;

        let mut headers = BTreeMap::new();
        if let Some(raw) = step.config.get("headers") {
            let Value::Object(map) = raw else {
                return Err(StepError::Config(format!(
                    "step '{}' config.headers must be an object",
                    step.id
                )));
            };
            for (name, value) in map {
                let text = value.as_str().ok_or_else(|| {
                    StepError::Config(format!("header '{name}' in step '{}' must be a string", step.id))
                })?;
                headers.insert(name.clone(), ctx.render(text)?);
            }
        }

        let body = step
            .config
            .get("body")
            .map(|b| ctx.render_value(b))
            .transpose()?;

        Ok(ApiRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

impl StepHandler for ApiCallHandler {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            let request = Self::build_request(&input)?;
            tracing::debug!(
                step_id = %input.step.id,
                method = %request.method,
                url = %request.url,
                "calling external api"
            );

            let response = self
                .client
                .call(request)
                .await
                .map_err(|e| StepError::Execution(e.to_string()))?;

            if !response.is_success() {
                return Err(StepError::Execution(format!(
                    "api returned status {}",
                    response.status
                )));
            }

            let mut result = ContextMap::new();
            result.insert(
                "api_response".to_string(),
                json!({ "status": response.status, "body": response.body }),
            );
            Ok(StepOutcome::Output(result))
        })
    }
}

// ---------------------------------------------------------------------------
// CONDITION
// ---------------------------------------------------------------------------

/// Evaluates the step's predicate and picks `true_step_id` or `false_step_id`.
#[derive(Debug, Default)]
pub struct ConditionHandler;

impl StepHandler for ConditionHandler {
    fn handle<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            let step = input.step;
            let predicate = step.condition.as_ref().ok_or_else(|| {
                StepError::Config(format!("condition step '{}' has no predicate", step.id))
            })?;

            let condition_met = condition::evaluate(predicate, input.context);
            let branch_key = if condition_met { "true_step_id" } else { "false_step_id" };
            let next_step_id = config_opt_str(step, branch_key).map(str::to_string);

            tracing::debug!(
                step_id = %step.id,
                condition_met,
                next = next_step_id.as_deref().unwrap_or("<end>"),
                "evaluated condition"
            );

            let mut output = ContextMap::new();
            output.insert("next_step_id".to_string(), json!(next_step_id));
            output.insert("condition_met".to_string(), json!(condition_met));
            Ok(StepOutcome::Branch {
                next_step_id,
                output,
            })
        })
    }
}

fn nest(key: Option<&str>, result: ContextMap) -> ContextMap {
    match key {
        Some(key) => {
            let mut outer = ContextMap::new();
            outer.insert(key.to_string(), Value::Object(result));
            outer
        }
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{ApiResponse, CollaboratorError, TaskResponse};
    use crate::workflow::context::ExecutionContext;
    use flowgate_types::workflow::WorkflowStepDefinition;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn step(value: Value) -> WorkflowStepDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn ctx(value: Value) -> ExecutionContext {
        let Value::Object(map) = value else {
            panic!("context fixture must be an object");
        };
        ExecutionContext::new(map, 1024 * 1024)
    }

    async fn run(
        handler: &dyn StepHandler,
        step: &WorkflowStepDefinition,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        handler
            .handle(StepInput {
                workflow_id: Uuid::nil(),
                execution_id: Uuid::nil(),
                step,
                context: ctx,
            })
            .await
    }

    fn output(outcome: StepOutcome) -> ContextMap {
        match outcome {
            StepOutcome::Output(map) => map,
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[derive(Default)]
    struct EchoExecutor {
        prompts: Mutex<Vec<String>>,
    }

    impl TaskExecutor for EchoExecutor {
        fn invoke<'a>(
            &'a self,
            agent_id: &'a str,
            prompt: &'a str,
            _context: &'a ContextMap,
        ) -> BoxFuture<'a, Result<TaskResponse, CollaboratorError>> {
            Box::pin(async move {
                self.prompts.lock().unwrap().push(prompt.to_string());
                let mut metadata = ContextMap::new();
                metadata.insert("agent".to_string(), json!(agent_id));
                Ok(TaskResponse {
                    output: json!(format!("echo: {prompt}")),
                    metadata,
                })
            })
        }
    }

    struct FixedApi {
        status: u16,
        seen: Mutex<Option<ApiRequest>>,
    }

    impl ApiClient for FixedApi {
        fn call<'a>(
            &'a self,
            request: ApiRequest,
        ) -> BoxFuture<'a, Result<ApiResponse, CollaboratorError>> {
            Box::pin(async move {
                *self.seen.lock().unwrap() = Some(request);
                Ok(ApiResponse {
                    status: self.status,
                    body: json!({ "ok": self.status < 300 }),
                })
            })
        }
    }

    #[tokio::test]
    async fn agent_renders_prompt_and_shapes_output() {
        let executor = Arc::new(EchoExecutor::default());
        let handler = AgentHandler::new(executor.clone());
        let s = step(json!({
            "id": "fetch", "name": "Fetch", "type": "agent",
            "config": { "agent_id": "researcher", "prompt_template": "Research {{ topic }}" }
        }));

        let out = output(run(&handler, &s, &ctx(json!({ "topic": "rust" }))).await.unwrap());

        assert_eq!(out["agent_id"], json!("researcher"));
        assert_eq!(out["agent_response"], json!("echo: Research rust"));
        assert_eq!(out["agent_metadata"]["agent"], json!("researcher"));
        assert_eq!(executor.prompts.lock().unwrap().as_slice(), ["Research rust"]);
    }

    #[tokio::test]
    async fn agent_output_key_nests_result() {
        let handler = AgentHandler::new(Arc::new(EchoExecutor::default()));
        let s = step(json!({
            "id": "fetch", "name": "Fetch", "type": "agent",
            "config": { "agent_id": "r", "output_key": "fetch" }
        }));

        let out = output(run(&handler, &s, &ctx(json!({}))).await.unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out["fetch"]["agent_id"], json!("r"));
    }

    #[tokio::test]
    async fn agent_missing_agent_id_is_config_error() {
        let handler = AgentHandler::new(Arc::new(EchoExecutor::default()));
        let s = step(json!({ "id": "a", "name": "A", "type": "agent" }));
        let err = run(&handler, &s, &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
    }

    #[tokio::test]
    async fn transform_extract_defaults_key_and_tolerates_missing_field() {
        let s = step(json!({
            "id": "x", "name": "X", "type": "transform",
            "config": { "transform_type": "extract", "field": "customer.name" }
        }));
        let out = output(
            run(&TransformHandler, &s, &ctx(json!({ "customer": { "name": "Ada" } })))
                .await
                .unwrap(),
        );
        assert_eq!(out["extracted_customer.name"], json!("Ada"));

        let out = output(run(&TransformHandler, &s, &ctx(json!({}))).await.unwrap());
        assert_eq!(out["extracted_customer.name"], Value::Null);
    }

    #[tokio::test]
    async fn transform_extract_respects_as() {
        let s = step(json!({
            "id": "x", "name": "X", "type": "transform",
            "config": { "transform_type": "extract", "field": "region", "as": "target_region" }
        }));
        let out = output(run(&TransformHandler, &s, &ctx(json!({ "region": "EU" }))).await.unwrap());
        assert_eq!(out["target_region"], json!("EU"));
    }

    #[tokio::test]
    async fn transform_format_renders_template() {
        let s = step(json!({
            "id": "f", "name": "F", "type": "transform",
            "config": { "transform_type": "format", "template": "{{ name }} owes {{ amount }}" }
        }));
        let out = output(
            run(&TransformHandler, &s, &ctx(json!({ "name": "Ada", "amount": 12 })))
                .await
                .unwrap(),
        );
        assert_eq!(out["formatted_output"], json!("Ada owes 12"));
    }

    #[tokio::test]
    async fn transform_format_missing_field_is_transform_error() {
        let s = step(json!({
            "id": "f", "name": "F", "type": "transform",
            "config": { "transform_type": "format", "template": "{{ missing }}" }
        }));
        let err = run(&TransformHandler, &s, &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Transform(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn api_call_renders_request() {
        let api = Arc::new(FixedApi { status: 200, seen: Mutex::new(None) });
        let handler = ApiCallHandler::new(api.clone());
        let s = step(json!({
            "id": "call", "name": "Call", "type": "api_call",
            "config": {
                "method": "post",
                "url": "https://example.test/orders/{{ order_id }}",
                "headers": { "x-tenant": "{{ tenant }}" },
                "body": { "note": "order {{ order_id }}" }
            }
        }));

        let out = output(
            run(&handler, &s, &ctx(json!({ "order_id": 7, "tenant": "acme" })))
                .await
                .unwrap(),
        );
        assert_eq!(out["api_response"]["status"], json!(200));

        let seen = api.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.method, "POST");
        assert_eq!(seen.url, "https://example.test/orders/7");
        assert_eq!(seen.headers["x-tenant"], "acme");
        assert_eq!(seen.body, Some(json!({ "note": "order 7" })));
    }

    #[tokio::test]
    async fn api_call_non_success_is_retryable() {
        let handler = ApiCallHandler::new(Arc::new(FixedApi { status: 503, seen: Mutex::new(None) }));
        let s = step(json!({
            "id": "call", "name": "Call", "type": "api_call",
            "config": { "url": "https://example.test" }
        }));
        let err = run(&handler, &s, &ctx(json!({}))).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn condition_routes_by_region() {
        let s = step(json!({
            "id": "route", "name": "Route", "type": "condition",
            "condition": { "op": "equals", "field": "region", "value": "EU" },
            "config": { "true_step_id": "eu_path", "false_step_id": "other_path" }
        }));

        match run(&ConditionHandler, &s, &ctx(json!({ "region": "EU" }))).await.unwrap() {
            StepOutcome::Branch { next_step_id, output } => {
                assert_eq!(next_step_id.as_deref(), Some("eu_path"));
                assert_eq!(output["condition_met"], json!(true));
            }
            other => panic!("expected branch, got {other:?}"),
        }

        match run(&ConditionHandler, &s, &ctx(json!({ "region": "US" }))).await.unwrap() {
            StepOutcome::Branch { next_step_id, .. } => {
                assert_eq!(next_step_id.as_deref(), Some("other_path"));
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn condition_without_branch_target_ends_workflow() {
        let s = step(json!({
            "id": "route", "name": "Route", "type": "condition",
            "condition": { "op": "exists", "field": "flag" },
            "config": { "true_step_id": "next" }
        }));
        match run(&ConditionHandler, &s, &ctx(json!({}))).await.unwrap() {
            StepOutcome::Branch { next_step_id, .. } => assert!(next_step_id.is_none()),
            other => panic!("expected branch, got {other:?}"),
        }
    }
}
