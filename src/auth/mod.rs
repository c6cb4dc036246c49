//! Vendor identity provider authorization
//!
//! OAuth2 authorization code flow with PKCE, refresh, and persistence of the
//! resulting bearer credentials.
//!
//! # Module Layout
//!
//! - [`pkce`]        -- PKCE `S256` verifier/challenge generation
//! - [`token_store`] -- credential bundle and its JSON file persistence
//! - [`flow`]        -- authorization URL, token exchange and refresh requests
//! - [`prompt`]      -- out-of-band capture of the custom-scheme redirect
//! - [`manager`]     -- credential lifecycle coordinating all of the above

pub mod flow;
pub mod manager;
pub mod pkce;
pub mod prompt;
pub mod token_store;

pub use manager::{CredentialManager, CredentialStatus};
pub use token_store::{CredentialBundle, TokenStore};
