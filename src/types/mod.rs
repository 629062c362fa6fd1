//! Session Types
//!
//! Configuration, persisted entities and wire types.

pub mod config;
pub mod introspection;
pub mod provider;
pub mod token;
pub mod user_info;
pub mod web;

pub use config::*;
pub use introspection::*;
pub use provider::*;
pub use token::*;
pub use user_info::*;
pub use web::*;
