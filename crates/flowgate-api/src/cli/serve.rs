//! `flowgate serve`: recover in-flight executions, then run the REST API and
//! the approval sweeper until shutdown.

use std::time::Duration;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use crate::cli::sweep::spawn_sweeper;
use crate::http::router::build_router;
use crate::state::AppState;

pub async fn serve(state: AppState, listen: Option<String>) -> Result<()> {
    let report = state.orchestrator.recover_in_flight().await?;
    let recovered = report.resumed.len() + report.suspended.len() + report.decided.len() + report.failed.len();
    if recovered > 0 {
        println!(
            "  {} Recovered executions: {} resumed, {} waiting approval, {} decided, {} failed",
            style("↻").bold(),
            report.resumed.len(),
            report.suspended.len(),
            report.decided.len(),
            report.failed.len()
        );
    }

    let addr = listen.unwrap_or_else(|| state.orchestrator.config().listen.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.orchestrator.clone(),
        Duration::from_secs(state.orchestrator.config().approval_sweep_interval_secs),
        cancel.clone(),
    );
    if sweeper.is_none() {
        tracing::info!("approval sweeper disabled (approval_sweep_interval_secs = 0)");
    }

    println!(
        "  {} Flowgate API listening on {}",
        style("⚡").bold(),
        style(format!("http://{addr}")).cyan()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    let router = build_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "approval sweeper task panicked");
        }
    }
    served?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
