//! CLI command definitions for the `flowgate` binary.

pub mod serve;
pub mod sweep;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use flowgate_infra::sqlite::pool::DATA_DIR_ENV;
use flowgate_observe::LogFormat;

/// Durable workflow orchestration with human approval gates.
#[derive(Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the database and config.toml (default: ~/.flowgate).
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    pub data_dir: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server and the approval deadline sweeper.
    Serve {
        /// Listen address (overrides `listen` in config.toml).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Fail every execution whose approval deadline has passed, then exit.
    SweepApprovals,

    /// Check a workflow definition file without storing it.
    Validate {
        /// Path to a JSON workflow definition.
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Filter directives implied by `--quiet` / `-v`; `None` defers to `RUST_LOG`.
    pub fn log_filter(&self) -> Option<String> {
        match self.verbose {
            0 if self.quiet => Some("error".to_string()),
            0 => None,
            1 => Some("info,flowgate_core=debug,flowgate_infra=debug,flowgate_api=debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_with_listen() {
        let cli = Cli::try_parse_from(["flowgate", "serve", "--listen", "0.0.0.0:8080"]).unwrap();
        match cli.command {
            Commands::Serve { listen } => assert_eq!(listen.as_deref(), Some("0.0.0.0:8080")),
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "flowgate",
            "validate",
            "wf.json",
            "--json",
            "--log-format",
            "json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.log_format, LogFormatArg::Json);
        assert_eq!(cli.log_filter().as_deref(), Some("trace"));
    }

    #[test]
    fn quiet_without_verbose_logs_errors_only() {
        let cli = Cli::try_parse_from(["flowgate", "--quiet", "sweep-approvals"]).unwrap();
        assert!(matches!(cli.command, Commands::SweepApprovals));
        assert_eq!(cli.log_filter().as_deref(), Some("error"));
    }
}
