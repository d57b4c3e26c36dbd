//! # docbus Adapter Layer
//!
//! Implementations of the domain's store and clock ports.
//!
//! ## Structure
//!
//! - `repository/` - Document store implementations
//! - `clock` - Manually driven clock for tests and simulations

pub mod clock;
pub mod repository;

pub use clock::ManualClock;
pub use repository::in_memory::{InMemoryDocumentStore, InMemorySession};
