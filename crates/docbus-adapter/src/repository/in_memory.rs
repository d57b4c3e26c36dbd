//! In-Memory Document Store
//!
//! A process-local implementation of the store ports. It keeps the
//! guarantees the domain relies on:
//! - create-if-absent compare-exchange writes checked atomically at commit
//! - all-or-nothing `save_changes`
//! - named databases, each with its own compare-exchange and document space
//!
//! The timeout index can run in manual mode, where new timeouts stay
//! invisible (and the index reports itself stale) until
//! `catch_up_index` is called. That reproduces the lag of an eventually
//! consistent index.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use docbus_domain::model::timeout::TimeoutEntry;
use docbus_domain::repository::document_store::{
    CompareExchangeValue, DocumentSession, DocumentStore, SessionOptions,
};
use docbus_domain::repository::timeout_index::{QueryPage, QueryStatistics, TimeoutQuery};
use shared::{PersistenceError, Result};

/// Name used when a session does not ask for a database
pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Default)]
struct Database {
    compare_exchange: HashMap<String, CompareExchangeValue>,
    documents: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct TimeoutIndex {
    /// Entries the index can see
    indexed: Vec<TimeoutEntry>,
    /// Written but not yet indexed
    pending: Vec<TimeoutEntry>,
    manual: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    databases: HashMap<String, Database>,
    /// Last compare-exchange index handed out, shared by all databases
    last_index: u64,
    timeouts: TimeoutIndex,
}

fn read_state(state: &RwLock<StoreState>) -> Result<RwLockReadGuard<'_, StoreState>> {
    state
        .read()
        .map_err(|_| PersistenceError::Store("Failed to acquire read lock".to_string()))
}

fn write_state(state: &RwLock<StoreState>) -> Result<RwLockWriteGuard<'_, StoreState>> {
    state
        .write()
        .map_err(|_| PersistenceError::Store("Failed to acquire write lock".to_string()))
}

fn database_name(options: &SessionOptions) -> String {
    options
        .database
        .clone()
        .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
}

/// In-memory Document Store
///
/// Thread-safe implementation using RwLock. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose timeout index only catches up on `catch_up_index`
    pub fn with_manual_indexing() -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.write() {
            state.timeouts.manual = true;
        }
        store
    }

    /// Persist a timeout
    ///
    /// In manual indexing mode it stays invisible to queries until the
    /// index catches up.
    pub fn add_timeout(&self, entry: TimeoutEntry) -> Result<()> {
        let mut state = write_state(&self.state)?;
        let index = &mut state.timeouts;
        index.indexed.retain(|t| t.id != entry.id);
        index.pending.retain(|t| t.id != entry.id);
        if index.manual {
            index.pending.push(entry);
        } else {
            index.indexed.push(entry);
        }
        Ok(())
    }

    /// Delete a timeout, returns whether it existed
    pub fn remove_timeout(&self, id: &str) -> Result<bool> {
        let mut state = write_state(&self.state)?;
        let index = &mut state.timeouts;
        let before = index.indexed.len() + index.pending.len();
        index.indexed.retain(|t| t.id != id);
        index.pending.retain(|t| t.id != id);
        Ok(index.indexed.len() + index.pending.len() < before)
    }

    /// Make every written timeout visible, returns how many were indexed
    pub fn catch_up_index(&self) -> Result<usize> {
        let mut state = write_state(&self.state)?;
        let index = &mut state.timeouts;
        let caught_up = index.pending.len();
        let pending = std::mem::take(&mut index.pending);
        index.indexed.extend(pending);
        if caught_up > 0 {
            debug!(count = caught_up, "Timeout index caught up");
        }
        Ok(caught_up)
    }

    /// Read a compare-exchange value outside any session
    pub fn compare_exchange_value(
        &self,
        database: Option<&str>,
        key: &str,
    ) -> Result<Option<CompareExchangeValue>> {
        let state = read_state(&self.state)?;
        Ok(state
            .databases
            .get(database.unwrap_or(DEFAULT_DATABASE))
            .and_then(|db| db.compare_exchange.get(key))
            .cloned())
    }

    /// Read a document outside any session
    pub fn document(&self, database: Option<&str>, id: &str) -> Result<Option<Value>> {
        let state = read_state(&self.state)?;
        Ok(state
            .databases
            .get(database.unwrap_or(DEFAULT_DATABASE))
            .and_then(|db| db.documents.get(id))
            .cloned())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn DocumentSession>> {
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            database: database_name(options),
            staged: Vec::new(),
            staged_creates: HashSet::new(),
        }))
    }

    async fn query_timeouts(&self, query: &TimeoutQuery) -> Result<QueryPage<TimeoutEntry>> {
        let state = read_state(&self.state)?;
        let index = &state.timeouts;

        let mut matching: Vec<&TimeoutEntry> =
            index.indexed.iter().filter(|t| query.matches(t)).collect();
        matching.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));

        let total_results = matching.len();
        let results = matching
            .into_iter()
            .skip(query.skip)
            .take(query.take)
            .cloned()
            .collect();

        Ok(QueryPage::new(
            results,
            QueryStatistics {
                is_stale: !index.pending.is_empty(),
                total_results,
                skipped_results: 0,
            },
        ))
    }
}

#[derive(Debug)]
enum StagedWrite {
    CreateCompareExchange { key: String, value: Value },
    PutCompareExchange { key: String, value: Value },
    StoreDocument { id: String, document: Value },
    DeleteDocument { id: String },
}

/// Session over an `InMemoryDocumentStore`
///
/// Writes are buffered until `save_changes`; dropping the session
/// discards them.
#[derive(Debug)]
pub struct InMemorySession {
    state: Arc<RwLock<StoreState>>,
    database: String,
    staged: Vec<StagedWrite>,
    staged_creates: HashSet<String>,
}

#[async_trait]
impl DocumentSession for InMemorySession {
    async fn get_compare_exchange(&mut self, key: &str) -> Result<Option<CompareExchangeValue>> {
        let state = read_state(&self.state)?;
        Ok(state
            .databases
            .get(&self.database)
            .and_then(|db| db.compare_exchange.get(key))
            .cloned())
    }

    fn create_compare_exchange(&mut self, key: &str, value: Value) -> Result<()> {
        if !self.staged_creates.insert(key.to_string()) {
            return Err(PersistenceError::duplicate_key(key));
        }
        self.staged.push(StagedWrite::CreateCompareExchange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn put_compare_exchange(&mut self, key: &str, value: Value) -> Result<()> {
        self.staged.push(StagedWrite::PutCompareExchange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn load_document(&mut self, id: &str) -> Result<Option<Value>> {
        let state = read_state(&self.state)?;
        Ok(state
            .databases
            .get(&self.database)
            .and_then(|db| db.documents.get(id))
            .cloned())
    }

    fn store_document(&mut self, id: &str, document: Value) -> Result<()> {
        self.staged.push(StagedWrite::StoreDocument {
            id: id.to_string(),
            document,
        });
        Ok(())
    }

    fn delete_document(&mut self, id: &str) -> Result<()> {
        self.staged.push(StagedWrite::DeleteDocument { id: id.to_string() });
        Ok(())
    }

    fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    async fn save_changes(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut guard = write_state(&self.state)?;
        let state = &mut *guard;

        // Check every create before applying anything
        if let Some(db) = state.databases.get(&self.database) {
            for write in &self.staged {
                if let StagedWrite::CreateCompareExchange { key, .. } = write {
                    if db.compare_exchange.contains_key(key) {
                        return Err(PersistenceError::concurrency(key.as_str()));
                    }
                }
            }
        }

        let db = state.databases.entry(self.database.clone()).or_default();
        let applied = self.staged.len();
        for write in self.staged.drain(..) {
            match write {
                StagedWrite::CreateCompareExchange { key, value }
                | StagedWrite::PutCompareExchange { key, value } => {
                    state.last_index += 1;
                    let index = state.last_index;
                    db.compare_exchange
                        .insert(key.clone(), CompareExchangeValue { key, index, value });
                }
                StagedWrite::StoreDocument { id, document } => {
                    db.documents.insert(id, document);
                }
                StagedWrite::DeleteDocument { id } => {
                    db.documents.remove(&id);
                }
            }
        }
        self.staged_creates.clear();

        debug!(database = %self.database, writes = applied, "Session changes saved");
        Ok(())
    }
}
