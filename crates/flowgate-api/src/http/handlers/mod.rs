//! HTTP request handlers for the REST API.

pub mod approval;
pub mod execution;
pub mod health;
pub mod workflow;
