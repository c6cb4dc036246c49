//! Vendor cloud directory
//!
//! - [`client`] -- account id, device list and connection signature calls
//! - [`types`]  -- request and response payloads

pub mod client;
pub mod types;

pub use client::{select_device, DirectoryClient};
pub use types::DeviceIdentity;
