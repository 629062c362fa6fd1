//! Builders
//!
//! Fluent builders for the configuration and the session client.

pub mod client;
pub mod config;

pub use client::{session_client, SessionClientBuilder};
pub use config::{oidc_config, OidcConfigBuilder};
