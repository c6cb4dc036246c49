//! Airlink - Philips Air+ cloud bridge library
//!
//! Controls a Philips air purifier through the vendor cloud: OAuth2 PKCE
//! login against the vendor identity provider, device and signature lookup
//! on the vendor API, and power/mode commands over an MQTT session that
//! authenticates with an AWS IoT custom authorizer.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: PKCE login, refresh and credential persistence
//! - `cloud`: account id, device list and connection signature lookups
//! - `control`: MQTT session, device protocols and the control surface
//! - `bridge`: startup sequence wiring the above together
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use airlink::cli::Cli;
//! use airlink::commands::Services;
//! use airlink::control::ControlSurface;
//! use airlink::{Bridge, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse_args();
//!     let config = Config::load("config/airlink.yaml", &cli)?;
//!     config.validate()?;
//!
//!     let services = Services::from_config(&config)?;
//!     if let Some(bridge) =
//!         Bridge::start(services.credentials.clone(), &services.directory, &config.mqtt).await?
//!     {
//!         bridge.controller().power_on().await?;
//!         bridge.shutdown().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bridge;
pub mod cli;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use error::{AirlinkError, Result};
