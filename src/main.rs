//! Quorumtrade - headless autonomous trading agent
//!
//! Runs the OODA pipeline without a UI: configuration comes from the
//! environment (plus an optional dotenv file), logs go to stdout via
//! `tracing`, and metrics are push-based.
//!
//! # Usage
//! ```sh
//! MODE=mock INSTRUMENTS="BTC/USD:crypto:mock" cargo run
//! ```
//!
//! # Exit codes
//! - 0: clean stop, including a kill-switch halt
//! - 2: misconfiguration
//! - 3: unrecoverable runtime failure
//! - 130: cancelled by signal

use clap::Parser;
use quorumtrade::application::system::Application;
use quorumtrade::config::Config;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "quorumtrade", version, about = "Autonomous ensemble trading agent")]
struct Cli {
    /// Path to a dotenv file loaded before configuration parsing
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            if dotenvy::from_path(path).is_err() {
                eprintln!("failed to load env file {}", path.display());
                std::process::exit(2);
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with(stdout_layer)
        .init();

    info!("Quorumtrade {} starting...", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(2);
        }
    };
    info!(
        "Configuration loaded: mode={:?}, instruments={:?}, oracles={:?}",
        config.mode,
        config
            .instruments
            .iter()
            .map(|i| i.symbol.as_str())
            .collect::<Vec<_>>(),
        config.ensemble.providers
    );

    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            std::process::exit(2);
        }
    };

    let mut running = app.start();
    info!("Agent running. Press Ctrl+C to shut down.");

    let exit = tokio::select! {
        result = &mut running.agent_task => result,
        signal = tokio::signal::ctrl_c() => {
            if signal.is_err() {
                error!("Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, cancelling...");
            running.cancel();
            (&mut running.agent_task).await
        }
    };

    match exit {
        Ok(agent_exit) => {
            info!("Agent exited: {:?}", agent_exit);
            std::process::exit(agent_exit.exit_code());
        }
        Err(e) => {
            error!("Agent task panicked: {}", e);
            std::process::exit(3);
        }
    }
}
