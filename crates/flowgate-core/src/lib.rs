//! Workflow engine and repository trait definitions for Flowgate.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements, plus the orchestrator that walks a
//! workflow's step graph. It depends only on `flowgate-types` -- never on
//! `flowgate-infra` or any database/IO crate.

pub mod collaborator;
pub mod event;
pub mod repository;
pub mod workflow;
