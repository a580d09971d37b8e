//! Flowgate CLI and REST API entry point.
//!
//! Binary name: `flowgate`

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use flowgate_infra::config::load_engine_config;
use flowgate_infra::sqlite::pool::default_data_dir;
use flowgate_observe::{TracingOptions, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        format: cli.log_format.into(),
        otel: cli.otel,
        filter: cli.log_filter(),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Offline validation needs no database.
    if let Commands::Validate { file } = &cli.command {
        return cli::validate::validate(file, cli.json).await;
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config = load_engine_config(&data_dir).await;
    let state = AppState::init(&data_dir, config).await?;
    tracing::debug!(data_dir = %state.data_dir.display(), "state initialized");

    match cli.command {
        Commands::Serve { listen } => cli::serve::serve(state, listen).await?,
        Commands::SweepApprovals => cli::sweep::sweep_approvals(&state, cli.json).await?,
        Commands::Validate { .. } => unreachable!("handled above"),
    }

    Ok(())
}
