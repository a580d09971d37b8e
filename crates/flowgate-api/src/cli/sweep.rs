//! Approval deadline sweep, run once from the CLI or periodically by `serve`.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use console::style;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::state::{AppState, Orchestrator};

/// `flowgate sweep-approvals`
pub async fn sweep_approvals(state: &AppState, json: bool) -> Result<()> {
    let failed = state.orchestrator.sweep_expired_approvals(Utc::now()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "failed": failed }))?);
        return Ok(());
    }

    if failed.is_empty() {
        println!("  {}", style("No expired approvals.").dim());
    } else {
        println!(
            "  {} Failed {} execution(s) past their approval deadline:",
            style("⏱").bold(),
            failed.len()
        );
        for id in &failed {
            println!("    {}", style(id).yellow());
        }
    }
    Ok(())
}

/// Sweep every `every` until `cancel` fires. A zero interval disables the
/// sweeper and spawns nothing.
pub fn spawn_sweeper(
    orchestrator: Orchestrator,
    every: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match orchestrator.sweep_expired_approvals(Utc::now()).await {
                        Ok(failed) if !failed.is_empty() => {
                            tracing::info!(count = failed.len(), "expired approvals swept");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "approval sweep failed"),
                    }
                }
            }
        }
        tracing::debug!("approval sweeper stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::config::EngineConfig;

    #[tokio::test]
    async fn sweep_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path(), EngineConfig::default()).await.unwrap();
        sweep_approvals(&state, true).await.unwrap();
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path(), EngineConfig::default()).await.unwrap();
        let cancel = CancellationToken::new();

        let handle = spawn_sweeper(state.orchestrator.clone(), Duration::from_secs(60), cancel.clone())
            .expect("sweeper enabled");
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper exits")
            .unwrap();
    }

    #[tokio::test]
    async fn zero_interval_disables_sweeper() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path(), EngineConfig::default()).await.unwrap();

        let handle = spawn_sweeper(state.orchestrator.clone(), Duration::ZERO, CancellationToken::new());
        assert!(handle.is_none());
    }
}
