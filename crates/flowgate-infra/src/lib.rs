//! Infrastructure layer for Flowgate.
//!
//! Implements the ports defined in `flowgate-core`: SQLite persistence, HTTP
//! collaborators (agent task endpoint, external API calls, notification
//! webhook) and the `config.toml` loader.

pub mod collaborator;
pub mod config;
pub mod sqlite;
