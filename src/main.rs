//! d2vindex
//!
//! Builds D2V index files for frame-accurate seeking in MPEG-1/2 and H.264 video
//! spread over one or more files.
//!
//! # Usage
//!
//! ```bash
//! d2vindex index VTS_01_1.VOB VTS_01_2.VOB --output movie.d2v
//! d2vindex info VTS_01_1.VOB
//! d2vindex inspect movie.d2v --json
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use d2v_indexer::cli::{commands, Cli, Commands};
use d2v_indexer::config_initialization::initialize_configuration_hierarchy;
use d2v_indexer::domain::model::JobOutcome;
use d2v_indexer::engine::CancellationToken;
use d2v_indexer::utils::logging::LoggingSystem;

const EXIT_FAILURE: u8 = 1;
/// 128 + SIGINT
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(JobOutcome::Finished) => ExitCode::SUCCESS,
        Ok(JobOutcome::Cancelled) => {
            eprintln!("Indexing cancelled.");
            ExitCode::from(EXIT_CANCELLED)
        }
        Ok(JobOutcome::Error(message)) => {
            eprintln!("Error: {}", message);
            ExitCode::from(EXIT_FAILURE)
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<JobOutcome> {
    let config = initialize_configuration_hierarchy(&cli.overrides())
        .context("Failed to load configuration")?;
    LoggingSystem::new(config.logging.clone()).initialize()?;

    info!("Starting d2vindex {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config.loaded_from {
        info!("Loaded configuration from: {}", path.display());
    }

    match cli.command {
        Commands::Index(args) => {
            let cancel = CancellationToken::new();
            let job_cancel = cancel.clone();
            let mut handle =
                tokio::task::spawn_blocking(move || commands::index(args, &config, job_cancel));

            let joined = tokio::select! {
                joined = &mut handle => joined,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, cancelling indexing");
                    cancel.cancel();
                    handle.await
                }
            };
            joined.context("Indexing task failed")?
        }
        Commands::Info(args) => {
            commands::info(args)?;
            Ok(JobOutcome::Finished)
        }
        Commands::Inspect(args) => {
            commands::inspect(args)?;
            Ok(JobOutcome::Finished)
        }
    }
}
