//! # docbus Use Case Layer
//!
//! Orchestrates the domain ports into the operations a message pipeline
//! calls:
//! - `OutboxStore`: exactly-once bookkeeping per incoming message
//! - `StorageSession`: handler writes that commit with the outbox record
//! - `GatewayDeduplication`: duplicate detection for gateway messages
//! - `TimeoutScanner` / `TimeoutPoller`: discovery and dispatch of due timeouts
//!
//! Nothing here spawns tasks. Every operation runs on the caller's task
//! and suspends only on store round-trips.

pub mod gateway_dedup;
pub mod outbox_store;
pub mod session_opener;
pub mod storage_session;
pub mod timeout_poller;
pub mod timeout_scanner;

pub use docbus_domain;

pub use gateway_dedup::GatewayDeduplication;
pub use outbox_store::{OutboxStore, OutboxTransaction};
pub use session_opener::{DefaultSessionOpener, SessionOpener, TenantAwareSessionOpener};
pub use storage_session::StorageSession;
pub use timeout_poller::{TimeoutDispatcher, TimeoutPoller, TimeoutPollerSettings};
pub use timeout_scanner::{TimeoutScanner, TimeoutScannerSettings};
