//! # docbus Shared
//!
//! Error taxonomy and configuration used across all docbus crates.

pub mod config;
pub mod error;

// Re-exports
pub use config::*;
pub use error::*;
