//! Storage Session - Business data written alongside the outbox record
//!
//! A handler that writes documents while processing a message gets a
//! `StorageSession`. When the message runs under an outbox transaction the
//! session is the transaction's own, so the documents and the outbox
//! record commit or fail together.

use tracing::debug;

use docbus_domain::model::context::OperationContext;
use docbus_domain::repository::document_store::{DocumentSession, DocumentStore};
use shared::Result;

use crate::outbox_store::OutboxTransaction;
use crate::session_opener::SessionOpener;

enum SessionHandle<'a> {
    /// Borrowed from an outbox transaction, which owns the commit
    Shared(&'a mut dyn DocumentSession),
    Owned(Box<dyn DocumentSession>),
}

/// Session handed to message handlers
pub struct StorageSession<'a> {
    handle: SessionHandle<'a>,
}

impl StorageSession<'static> {
    /// Open a session of its own, for messages processed without an outbox
    pub async fn open(
        store: &dyn DocumentStore,
        opener: &dyn SessionOpener,
        context: &OperationContext,
    ) -> Result<Self> {
        let session = store.open_session(&opener.session_options(context)).await?;
        Ok(Self {
            handle: SessionHandle::Owned(session),
        })
    }
}

impl<'a> StorageSession<'a> {
    /// Share the outbox transaction's session
    pub fn adapt(transaction: &'a mut OutboxTransaction) -> Result<Self> {
        Ok(Self {
            handle: SessionHandle::Shared(transaction.session_mut()?),
        })
    }

    pub fn session(&mut self) -> &mut dyn DocumentSession {
        match &mut self.handle {
            SessionHandle::Shared(session) => &mut **session,
            SessionHandle::Owned(session) => session.as_mut(),
        }
    }

    /// Whether `complete` saves the changes itself
    pub fn owns_commit(&self) -> bool {
        matches!(self.handle, SessionHandle::Owned(_))
    }

    /// Finish the handler's unit of work
    ///
    /// For an adapted session this does nothing: the outbox commit applies
    /// the staged writes.
    pub async fn complete(self) -> Result<()> {
        match self.handle {
            SessionHandle::Shared(_) => {
                debug!("Storage session completes with the outbox transaction");
                Ok(())
            }
            SessionHandle::Owned(mut session) => session.save_changes().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use docbus_adapter::InMemoryDocumentStore;
    use docbus_domain::model::endpoint::EndpointName;
    use docbus_domain::model::outbox::OutboxMessage;
    use serde_json::json;

    use crate::outbox_store::OutboxStore;
    use crate::session_opener::{DefaultSessionOpener, TenantAwareSessionOpener};

    fn outbox(store: &InMemoryDocumentStore) -> OutboxStore {
        OutboxStore::new(Arc::new(store.clone()), EndpointName::new("Sales"))
    }

    // ============== Shared Session Tests ==============

    #[tokio::test]
    async fn test_documents_commit_with_outbox_record() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        let mut transaction = outbox.begin_transaction(&context).await.unwrap();
        outbox
            .store(OutboxMessage::new("m-1", vec![]), &mut transaction, &context)
            .await
            .unwrap();

        let mut storage = StorageSession::adapt(&mut transaction).unwrap();
        assert!(!storage.owns_commit());
        storage
            .session()
            .store_document("orders/1", json!({"state": "placed"}))
            .unwrap();
        storage.complete().await.unwrap();

        // Nothing visible before the outbox commit
        assert!(store.document(None, "orders/1").unwrap().is_none());

        transaction.commit().await.unwrap();
        assert_eq!(
            store.document(None, "orders/1").unwrap(),
            Some(json!({"state": "placed"}))
        );
    }

    #[tokio::test]
    async fn test_documents_discarded_when_outbox_conflicts() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        let mut winner = outbox.begin_transaction(&context).await.unwrap();
        outbox
            .store(OutboxMessage::new("m-1", vec![]), &mut winner, &context)
            .await
            .unwrap();
        winner.commit().await.unwrap();

        let mut loser = outbox.begin_transaction(&context).await.unwrap();
        outbox
            .store(OutboxMessage::new("m-1", vec![]), &mut loser, &context)
            .await
            .unwrap();
        StorageSession::adapt(&mut loser)
            .unwrap()
            .session()
            .store_document("orders/2", json!({"state": "placed"}))
            .unwrap();

        assert!(loser.commit().await.unwrap_err().is_concurrency());
        assert!(store.document(None, "orders/2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_documents_discarded_when_transaction_dropped() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        {
            let mut transaction = outbox.begin_transaction(&context).await.unwrap();
            let mut storage = StorageSession::adapt(&mut transaction).unwrap();
            storage.session().store_document("orders/3", json!({})).unwrap();
        }

        assert!(store.document(None, "orders/3").unwrap().is_none());
    }

    // ============== Owned Session Tests ==============

    #[tokio::test]
    async fn test_owned_session_commits_on_complete() {
        let store = InMemoryDocumentStore::new();
        let mut storage =
            StorageSession::open(&store, &DefaultSessionOpener, &OperationContext::new())
                .await
                .unwrap();
        assert!(storage.owns_commit());

        storage.session().store_document("orders/4", json!({"total": 3})).unwrap();
        assert!(store.document(None, "orders/4").unwrap().is_none());

        storage.complete().await.unwrap();
        assert_eq!(store.document(None, "orders/4").unwrap(), Some(json!({"total": 3})));
    }

    #[tokio::test]
    async fn test_owned_session_targets_tenant_database() {
        let store = InMemoryDocumentStore::new();
        let opener = TenantAwareSessionOpener::new("tenant-id");
        let context = OperationContext::new().with_header("tenant-id", "acme");

        let mut storage = StorageSession::open(&store, &opener, &context).await.unwrap();
        storage.session().store_document("orders/5", json!({})).unwrap();
        storage.complete().await.unwrap();

        assert!(store.document(Some("acme"), "orders/5").unwrap().is_some());
        assert!(store.document(None, "orders/5").unwrap().is_none());
    }
}
