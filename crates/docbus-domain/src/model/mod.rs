//! Domain Models - The vocabulary of docbus
//!
//! Outbox records, timeouts and the identities that scope them.

pub mod context;
pub mod endpoint;
pub mod gateway;
pub mod outbox;
pub mod timeout;
