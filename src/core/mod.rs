//! Session Core Components
//!
//! Transport, request execution, PKCE and the authentication state machine.

pub mod connector;
pub mod execution;
pub mod pkce;
pub mod state;

pub use connector::*;
pub use execution::*;
pub use pkce::*;
pub use state::*;
