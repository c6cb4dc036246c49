//! Airlink - Philips Air+ cloud bridge CLI
//!
#![doc = "Main entry point for the airlink command-line tool."]

use anyhow::Result;
use colored::Colorize;

use airlink::cli::{Cli, Commands};
use airlink::commands;
use airlink::config::Config;
use airlink::control::ControlOp;
use airlink::error::as_auth_error;
use airlink::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.json_logs)?;

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/airlink.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let outcome = dispatch(&cli, &config).await;
    if let Err(e) = &outcome {
        if let Some(auth) = as_auth_error(e) {
            eprintln!("{} {}", "Hint:".yellow(), auth.operator_hint());
        }
    }
    outcome
}

async fn dispatch(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Login => {
            tracing::info!("Starting interactive login");
            commands::auth::login(config).await
        }
        Commands::Logout => commands::auth::logout(config),
        Commands::Status => commands::auth::status(config),
        Commands::Devices => commands::devices::list(config).await,
        Commands::On => commands::control::once(config, ControlOp::PowerOn).await,
        Commands::Off => commands::control::once(config, ControlOp::PowerOff).await,
        Commands::Mode { mode } => {
            commands::control::once(config, ControlOp::SetMode(*mode)).await
        }
        Commands::Run => {
            tracing::info!("Starting interactive control loop");
            commands::control::run(config).await
        }
    }
}
