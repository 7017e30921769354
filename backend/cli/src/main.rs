mod api;
mod auth;
mod config_cmd;
mod error;
mod server;
mod status_cmd;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{error, warn};

use chatloom_config::{config_dir, config_file_path, load_and_prepare, validate, ChatloomConfig};
use chatloom_logging::{init_logger, LoggerGuard};

#[derive(Parser)]
#[command(name = "chatloom")]
#[command(about = "chatloom: multi-turn LLM conversations with token-budgeted memory")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.chatloom/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
        /// Use the scripted provider and in-memory storage
        #[arg(long)]
        mock: bool,
    },
    /// Query a running server
    Status,
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the config and print it with secrets masked
    Check {
        #[arg(long)]
        mock: bool,
    },
    /// Print the effective config with secrets masked
    Show,
    /// Write a starter config file
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    match cli.command {
        Commands::Serve { port, mock } => {
            let mut config = load_and_prepare(&path).await?;
            let _logger = start_logging(&config);
            if let Some(port) = port {
                config.server.get_or_insert_with(Default::default).port = Some(port);
            }
            if mock {
                let storage = config.storage.get_or_insert_with(Default::default);
                storage.backend = Some(chatloom_config::StorageBackend::Memory);
            }

            let report = validate(&config, mock);
            for warning in &report.warnings {
                warn!(path = %warning.path, message = %warning.message, "Config warning");
            }
            for err in &report.errors {
                error!(path = %err.path, message = %err.message, "Config error");
            }
            if !report.is_valid() {
                bail!("refusing to start with {} config error(s)", report.errors.len());
            }

            server::run_server(config, mock).await?;
        }
        Commands::Status => {
            let config = load_and_prepare(&path).await?;
            let server = config.server.unwrap_or_default();
            status_cmd::run(
                server.bind.as_deref().unwrap_or("127.0.0.1"),
                server.port.unwrap_or(8080),
            )
            .await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Check { mock } => config_cmd::check(&load_and_prepare(&path).await?, mock)?,
            ConfigAction::Show => config_cmd::show(&load_and_prepare(&path).await?)?,
            ConfigAction::Init { force } => config_cmd::init(&path, force).await?,
        },
    }

    Ok(())
}

fn start_logging(config: &ChatloomConfig) -> LoggerGuard {
    let logging = config.logging.clone().unwrap_or_default();
    init_logger(
        logging.dir.as_deref().map(Path::new),
        logging.level.as_deref().unwrap_or("info"),
        logging.json.unwrap_or(false),
    )
}
