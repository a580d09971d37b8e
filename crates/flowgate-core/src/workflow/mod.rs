//! Workflow engine: definitions, step execution, approvals and the
//! orchestrator that ties them together.

pub mod approval;
pub mod builtin;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod definition;
pub mod handler;
pub mod orchestrator;
pub mod parallel;
pub mod retry;
pub mod step_runner;

pub use orchestrator::{
    ApprovalDecision, Collaborators, OrchestratorBuilder, OrchestratorError, RecoveryReport,
    WorkflowOrchestrator,
};
