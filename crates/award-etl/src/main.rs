//! Award ETL - Main entry point

use award_etl::{
    cli::{self, Cli},
    config::EtlConfig,
    orchestrator::Orchestrator,
};
use award_etl_common::logging::{init_logging, LogConfig, LogLevel};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Environment overrides the verbose flag
    let base = if cli.verbose {
        LogConfig::builder().level(LogLevel::Debug).build()
    } else {
        LogConfig::default()
    };
    let log_config = match base.merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid logging configuration: {e}");
            process::exit(2);
        },
    };
    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    let code = match run(&cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            1
        },
    };

    // flush the file writer before exiting
    drop(guard);
    process::exit(code);
}

/// Returns whether the command succeeded
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = EtlConfig::load()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::connect(config, cancel).await?;
    info!(command = ?cli.command, "Executing command");

    let output = cli::execute(&cli.command, &orchestrator).await?;
    println!("{}", serde_json::to_string_pretty(&output.body)?);
    Ok(output.success)
}
