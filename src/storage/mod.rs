//! Persistence
//!
//! Storage backends, the encryption transform and the typed store built on them.

pub mod backend;
pub mod encryption;
pub mod store;

pub use backend::*;
pub use encryption::*;
pub use store::*;
