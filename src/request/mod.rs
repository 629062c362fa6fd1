//! Requests
//!
//! Construction of the session's outbound requests and decoding of their responses.

pub mod builder;
pub mod response;

pub use builder::*;
pub use response::*;
