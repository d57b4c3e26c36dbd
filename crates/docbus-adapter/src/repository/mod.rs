//! Persistence Adapters - Document store implementations
//!
//! These implement the store ports from docbus-domain.

pub mod in_memory;
