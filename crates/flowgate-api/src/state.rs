//! Application state wiring the engine to its concrete collaborators.
//!
//! The orchestrator is generic over its repository; AppState pins it to the
//! SQLite implementation and injects the HTTP collaborators from config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowgate_core::collaborator::{Notifier, TaskExecutor};
use flowgate_core::event::{EventBus, FanoutNotifier};
use flowgate_core::workflow::{Collaborators, WorkflowOrchestrator};
use flowgate_infra::collaborator::task::UnconfiguredTaskExecutor;
use flowgate_infra::collaborator::{HttpTaskExecutor, ReqwestApiClient, WebhookNotifier};
use flowgate_infra::sqlite::pool::database_url;
use flowgate_infra::sqlite::{DatabasePool, SqliteWorkflowRepository};
use flowgate_types::config::EngineConfig;

pub type Orchestrator = WorkflowOrchestrator<SqliteWorkflowRepository>;

/// Shared application state used by both the CLI and the REST API.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// In-process event stream; every engine notification is published here.
    pub events: EventBus,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the database under `data_dir` and wire the orchestrator.
    pub async fn init(data_dir: &Path, config: EngineConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let pool = DatabasePool::new(&database_url(data_dir)).await?;
        let repo = SqliteWorkflowRepository::new(pool);

        let task_executor: Arc<dyn TaskExecutor> = match &config.task_endpoint {
            Some(endpoint) => Arc::new(HttpTaskExecutor::new(endpoint.as_str())?),
            None => {
                tracing::warn!("no task_endpoint configured; agent steps will fail");
                Arc::new(UnconfiguredTaskExecutor)
            }
        };

        let events = EventBus::new(config.event_capacity);
        let mut notifier = FanoutNotifier::new().with(Arc::new(events.clone()));
        if let Some(url) = &config.notification_webhook {
            notifier = notifier.with(Arc::new(WebhookNotifier::new(url.as_str())?));
        }
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);

        let collaborators = Collaborators {
            task_executor,
            api_client: Arc::new(ReqwestApiClient::new()?),
            notifier,
        };

        let orchestrator = WorkflowOrchestrator::builder(repo, collaborators)
            .config(config)
            .build();

        Ok(Self {
            orchestrator,
            events,
            data_dir: data_dir.to_path_buf(),
        })
    }
}
