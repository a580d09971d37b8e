//! Repository trait definitions (ports).
//!
//! `WorkflowRepository` is the storage interface the infrastructure layer
//! (flowgate-infra) implements. `InMemoryWorkflowRepository` is a
//! dashmap-backed implementation for tests and embedding.

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::WorkflowRepository;
