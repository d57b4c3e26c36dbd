//! Error types for docbus

use thiserror::Error;

/// The same key was staged for creation twice in one session.
///
/// This is a caller bug and is raised when the second write is staged,
/// never deferred to commit.
#[derive(Debug, Error)]
#[error("Key '{key}' was already staged for creation in this session")]
pub struct DuplicateKeyError {
    pub key: String,
}

/// Another transaction created the same key first.
///
/// For outbox records this is the deduplication signal: the message is
/// already owned by another processing attempt.
#[derive(Debug, Error)]
#[error("Concurrency conflict on '{key}': it was created by another transaction")]
pub struct ConcurrencyError {
    pub key: String,
}

/// General docbus error type
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKeyError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("Transaction has already been committed")]
    TransactionCompleted,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        DuplicateKeyError { key: key.into() }.into()
    }

    pub fn concurrency(key: impl Into<String>) -> Self {
        ConcurrencyError { key: key.into() }.into()
    }

    /// True when a commit lost the create-if-absent race.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, PersistenceError::Concurrency(_))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, PersistenceError::DuplicateKey(_))
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = PersistenceError::concurrency("Outbox/Sales/1");
        assert!(err.is_concurrency());
        assert!(!err.is_duplicate_key());

        let err = PersistenceError::duplicate_key("Outbox/Sales/1");
        assert!(err.is_duplicate_key());
        assert!(!err.is_concurrency());
    }

    #[test]
    fn test_messages_name_the_key() {
        let err = PersistenceError::concurrency("Outbox/Sales/42");
        assert!(err.to_string().contains("Outbox/Sales/42"));
    }
}
