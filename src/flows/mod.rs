//! Session Flows
//!
//! Browser redirect flows that move the session between states: the
//! authorization code grant with PKCE and the OIDC end-session round trip.

pub mod web;

pub use web::{create_web_auth_flow, WebAuthFlow};
