//! # docbus Domain Layer
//!
//! Outbox deduplication and timeout discovery, independent of any
//! particular document database.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Domain Layer (This Crate)                     │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │  model/     - Outbox records, timeouts, endpoint identity   ││
//! │  │  repository/- Store and clock ports (not implementations)   ││
//! │  │  service/   - Key construction, index page cursor           ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Uniqueness of outbox records is delegated to the store's
//! compare-exchange primitive. Nothing in this crate reads-then-writes to
//! decide whether a record exists.

pub mod model;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use model::{
    context::OperationContext,
    endpoint::EndpointName,
    gateway::GatewayMessage,
    outbox::{OutboxMessage, OutboxOperation, OutboxRecord, TransportOperation},
    timeout::{TimeoutEntry, TimeoutsChunk},
};

pub use repository::{
    clock::{Clock, SystemClock},
    document_store::{CompareExchangeValue, DocumentSession, DocumentStore, SessionOptions},
    timeout_index::{QueryPage, QueryStatistics, TimeoutQuery, MAX_PAGE_SIZE},
};

pub use service::{
    outbox_key::{gateway_message_key, outbox_record_key},
    page_cursor::PageCursor,
};
