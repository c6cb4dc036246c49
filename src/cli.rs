//! Command-line interface definition for Airlink
//!
//! This module defines the CLI structure using clap's derive API, providing
//! commands for logging in, inspecting the account and controlling the
//! purifier.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::control::protocol::FanMode;

/// Airlink - Philips Air+ cloud bridge
///
/// Authenticates against the vendor identity provider and issues power and
/// mode commands to the first purifier registered on the account.
#[derive(Parser, Debug, Clone)]
#[command(name = "airlink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/airlink.yaml")]
    pub config: Option<String>,

    /// Override the credential file location
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Airlink
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the interactive login and store fresh credentials
    Login,

    /// Delete stored credentials
    Logout,

    /// Show whether stored credentials exist and when they expire
    Status,

    /// List the devices registered to the account
    Devices,

    /// Turn the purifier on
    On,

    /// Turn the purifier off
    Off,

    /// Set the fan mode
    Mode {
        /// One of: auto, low, medium, high
        mode: FanMode,
    },

    /// Connect and read commands (on, off, mode <m>, quit) from stdin
    Run,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
