//! Shared types, the error-context macro, and utilities used across all parley crates.

pub mod clock;
pub mod error;
pub mod queue;
pub mod template;
pub mod types;

pub use error::FromMessage;
