//! Document Store - The persistence collaborator the domain needs
//!
//! Two kinds of storage are required:
//! - compare-exchange values: cluster-wide key/value records whose
//!   "create only if absent" write is checked atomically at commit
//! - documents: plain records written through the same session so they
//!   commit together with the compare-exchange writes
//!
//! Writes are staged on a session and applied all-or-nothing by
//! `save_changes`. Reads go to the store.

use async_trait::async_trait;
use serde_json::Value;
use shared::Result;

use crate::model::timeout::TimeoutEntry;
use crate::repository::timeout_index::{QueryPage, TimeoutQuery};

/// How to open a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Target database; `None` is the store's default database
    pub database: Option<String>,
}

impl SessionOptions {
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
        }
    }
}

/// A compare-exchange value and the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct CompareExchangeValue {
    pub key: String,
    /// Store-assigned version, bumped on every write
    pub index: u64,
    pub value: Value,
}

/// Document Store Trait
///
/// This is a PORT in hexagonal architecture.
/// Implementations are shared behind `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a unit of work
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn DocumentSession>>;

    /// Query the timeout index
    ///
    /// Results are ordered by due time ascending. The index may lag
    /// behind writes; the returned statistics say by how much it can be
    /// trusted.
    async fn query_timeouts(&self, query: &TimeoutQuery) -> Result<QueryPage<TimeoutEntry>>;
}

/// Unit of work against a `DocumentStore`
///
/// Dropping a session without calling `save_changes` discards
/// everything staged on it.
#[async_trait]
pub trait DocumentSession: Send {
    /// Read a compare-exchange value
    async fn get_compare_exchange(&mut self, key: &str) -> Result<Option<CompareExchangeValue>>;

    /// Stage a create-if-absent write
    ///
    /// Fails immediately with `DuplicateKey` if this session already staged
    /// a create for `key`. At commit, fails with `Concurrency` if the key
    /// exists in the store.
    fn create_compare_exchange(&mut self, key: &str, value: Value) -> Result<()>;

    /// Stage an unconditional write (last writer wins)
    fn put_compare_exchange(&mut self, key: &str, value: Value) -> Result<()>;

    async fn load_document(&mut self, id: &str) -> Result<Option<Value>>;

    fn store_document(&mut self, id: &str, document: Value) -> Result<()>;

    fn delete_document(&mut self, id: &str) -> Result<()>;

    /// Whether anything is staged
    fn has_changes(&self) -> bool;

    /// Apply all staged writes atomically
    async fn save_changes(&mut self) -> Result<()>;
}
