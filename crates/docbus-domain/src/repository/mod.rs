//! Store Traits - The "Ports" of Hexagonal Architecture
//!
//! These traits define WHAT the domain needs from a document database,
//! but NOT how it's actually done. That's the adapter's job.
//!
//! ```text
//! Domain Layer          │  Adapter Layer
//! ──────────────────────┼────────────────────────
//! trait DocumentStore   │  InMemoryDocumentStore
//!   open_session()      │  (a real document database client)
//!   query_timeouts()    │
//! trait Clock           │  SystemClock / ManualClock
//! ```

pub mod clock;
pub mod document_store;
pub mod timeout_index;
