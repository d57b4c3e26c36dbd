//! Outbox Store - Exactly-once bookkeeping for incoming messages
//!
//! The flow for one incoming message:
//! 1. `begin_transaction` opens a session
//! 2. `store` stages a create-if-absent write of the outbox record
//! 3. `OutboxTransaction::commit` applies it, together with any other
//!    writes staged on the same session
//! 4. after the transport operations went out, `set_as_dispatched`
//!
//! Deduplication IS the commit failure: if another attempt created the
//! record first, `commit` returns a `Concurrency` error and the caller
//! abandons this attempt. There is no lock and no existence check.

use std::sync::Arc;

use tracing::{debug, info, warn};

use docbus_domain::model::context::OperationContext;
use docbus_domain::model::endpoint::EndpointName;
use docbus_domain::model::outbox::{OutboxMessage, OutboxRecord};
use docbus_domain::repository::document_store::{DocumentSession, DocumentStore};
use docbus_domain::service::outbox_key::outbox_record_key;
use shared::{PersistenceError, Result};

use crate::session_opener::{DefaultSessionOpener, SessionOpener};

/// Outbox persistence for one endpoint
#[derive(Clone)]
pub struct OutboxStore {
    store: Arc<dyn DocumentStore>,
    endpoint: EndpointName,
    opener: Arc<dyn SessionOpener>,
}

impl OutboxStore {
    pub fn new(store: Arc<dyn DocumentStore>, endpoint: EndpointName) -> Self {
        Self {
            store,
            endpoint,
            opener: Arc::new(DefaultSessionOpener),
        }
    }

    /// Builder: choose the session's database per message
    pub fn with_session_opener(mut self, opener: Arc<dyn SessionOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    async fn open_session(&self, context: &OperationContext) -> Result<Box<dyn DocumentSession>> {
        let options = self.opener.session_options(context);
        self.store.open_session(&options).await
    }

    /// Open the unit of work for processing one message
    pub async fn begin_transaction(&self, context: &OperationContext) -> Result<OutboxTransaction> {
        let session = self.open_session(context).await?;
        Ok(OutboxTransaction::new(session))
    }

    /// Stage the outbox record for `message` on `transaction`
    ///
    /// Storing the same message id twice on one transaction fails right
    /// here with `DuplicateKey`.
    pub async fn store(
        &self,
        message: OutboxMessage,
        transaction: &mut OutboxTransaction,
        _context: &OperationContext,
    ) -> Result<()> {
        let key = outbox_record_key(&self.endpoint, &message.message_id);
        let record = OutboxRecord::from(message);
        let value = serde_json::to_value(&record)?;

        transaction.session_mut()?.create_compare_exchange(&key, value)?;

        debug!(
            endpoint = %self.endpoint,
            key = %key,
            operations = record.transport_operations.len(),
            "Outbox record staged"
        );
        Ok(())
    }

    /// Look up the message's outbox entry
    ///
    /// `None` when the message was never stored. A dispatched record comes
    /// back without transport operations.
    pub async fn get(
        &self,
        message_id: &str,
        context: &OperationContext,
    ) -> Result<Option<OutboxMessage>> {
        Ok(self
            .get_record(message_id, context)
            .await?
            .map(OutboxRecord::into_message))
    }

    /// Look up the persisted record, including its dispatched flag
    pub async fn get_record(
        &self,
        message_id: &str,
        context: &OperationContext,
    ) -> Result<Option<OutboxRecord>> {
        let key = outbox_record_key(&self.endpoint, message_id);
        let mut session = self.open_session(context).await?;

        match session.get_compare_exchange(&key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Flag the record as dispatched
    ///
    /// Written back without a version check: only the attempt that
    /// dispatched the operations calls this. Calling it again is harmless.
    pub async fn set_as_dispatched(&self, message_id: &str, context: &OperationContext) -> Result<()> {
        let key = outbox_record_key(&self.endpoint, message_id);
        let mut session = self.open_session(context).await?;

        let Some(entry) = session.get_compare_exchange(&key).await? else {
            warn!(endpoint = %self.endpoint, key = %key, "No outbox record to mark as dispatched");
            return Ok(());
        };

        let mut record: OutboxRecord = serde_json::from_value(entry.value)?;
        if !record.mark_dispatched() {
            debug!(key = %key, "Outbox record was already dispatched");
        }

        session.put_compare_exchange(&key, serde_json::to_value(&record)?)?;
        session.save_changes().await?;

        debug!(endpoint = %self.endpoint, key = %key, "Outbox record marked as dispatched");
        Ok(())
    }
}

/// Unit of work for one incoming message
///
/// Dropping it without `commit` aborts: nothing staged reaches the store.
pub struct OutboxTransaction {
    session: Option<Box<dyn DocumentSession>>,
}

impl OutboxTransaction {
    fn new(session: Box<dyn DocumentSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// The underlying session, for writes that must commit with the outbox record
    pub fn session_mut(&mut self) -> Result<&mut dyn DocumentSession> {
        match self.session.as_mut() {
            Some(session) => Ok(session.as_mut()),
            None => Err(PersistenceError::TransactionCompleted),
        }
    }

    /// Apply everything staged on this transaction atomically
    ///
    /// A `Concurrency` error means another attempt already owns the message.
    pub async fn commit(mut self) -> Result<()> {
        let mut session = self
            .session
            .take()
            .ok_or(PersistenceError::TransactionCompleted)?;

        match session.save_changes().await {
            Ok(()) => {
                debug!("Outbox transaction committed");
                Ok(())
            }
            Err(err) if err.is_concurrency() => {
                info!(error = %err, "Message is already being processed by another attempt");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for OutboxTransaction {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if session.has_changes() {
                debug!("Outbox transaction dropped without commit, staged writes discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbus_adapter::InMemoryDocumentStore;
    use docbus_domain::model::outbox::TransportOperation;
    use crate::session_opener::TenantAwareSessionOpener;

    fn outbox(store: &InMemoryDocumentStore) -> OutboxStore {
        OutboxStore::new(Arc::new(store.clone()), EndpointName::new("TestEndpoint"))
    }

    fn message_with_payload(message_id: &str) -> OutboxMessage {
        OutboxMessage::new(
            message_id,
            vec![
                TransportOperation::new(message_id, vec![7u8; 1024 * 5])
                    .with_header("NServiceBus.MessageIntent", "Send")
                    .with_option("Destination", "Billing"),
                TransportOperation::new("second-op", vec![0u8, 255, 128])
                    .with_header("NServiceBus.ContentType", "application/json"),
            ],
        )
    }

    async fn store_and_commit(outbox: &OutboxStore, message: OutboxMessage) -> Result<()> {
        let context = OperationContext::new();
        let mut transaction = outbox.begin_transaction(&context).await?;
        outbox.store(message, &mut transaction, &context).await?;
        transaction.commit().await
    }

    // ============== Deduplication Tests ==============

    #[tokio::test]
    async fn test_second_committed_store_fails_with_concurrency() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);

        store_and_commit(&outbox, OutboxMessage::new("MySpecialId", vec![]))
            .await
            .unwrap();
        let err = store_and_commit(&outbox, OutboxMessage::new("MySpecialId", vec![]))
            .await
            .unwrap_err();

        assert!(err.is_concurrency());
    }

    #[tokio::test]
    async fn test_interleaved_transactions_only_one_commits() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        let mut first = outbox.begin_transaction(&context).await.unwrap();
        let mut second = outbox.begin_transaction(&context).await.unwrap();
        outbox
            .store(OutboxMessage::new("m-1", vec![]), &mut first, &context)
            .await
            .unwrap();
        outbox
            .store(OutboxMessage::new("m-1", vec![]), &mut second, &context)
            .await
            .unwrap();

        let results = [first.commit().await, second.commit().await];
        let committed = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_concurrency()))
            .count();

        assert_eq!(committed, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_attempts_from_tasks() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    store_and_commit(&outbox, OutboxMessage::new("contended", vec![])).await
                })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => committed += 1,
                Err(err) => assert!(err.is_concurrency()),
            }
        }
        assert_eq!(committed, 1);
    }

    #[tokio::test]
    async fn test_same_id_twice_in_one_transaction_fails_before_commit() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        let mut transaction = outbox.begin_transaction(&context).await.unwrap();
        outbox
            .store(OutboxMessage::new("MySpecialId", vec![]), &mut transaction, &context)
            .await
            .unwrap();
        let err = outbox
            .store(OutboxMessage::new("MySpecialId", vec![]), &mut transaction, &context)
            .await
            .unwrap_err();

        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn test_dropped_transaction_stores_nothing() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        {
            let mut transaction = outbox.begin_transaction(&context).await.unwrap();
            outbox
                .store(OutboxMessage::new("abandoned", vec![]), &mut transaction, &context)
                .await
                .unwrap();
        }

        assert!(outbox.get("abandoned", &context).await.unwrap().is_none());
        // The id is still free for a later attempt
        store_and_commit(&outbox, OutboxMessage::new("abandoned", vec![]))
            .await
            .unwrap();
    }

    // ============== Lookup Tests ==============

    #[tokio::test]
    async fn test_get_returns_stored_operations() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let message_id = uuid::Uuid::new_v4().simple().to_string();
        let message = message_with_payload(&message_id);

        store_and_commit(&outbox, message.clone()).await.unwrap();

        let found = outbox
            .get(&message_id, &OperationContext::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, message);
        assert_eq!(found.transport_operations[0].body.len(), 1024 * 5);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);

        let found = outbox.get("never-stored", &OperationContext::new()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_record_is_stored_under_endpoint_key() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let message_id = uuid::Uuid::new_v4().to_string();

        store_and_commit(&outbox, OutboxMessage::new(message_id.clone(), vec![]))
            .await
            .unwrap();

        let key = format!("Outbox/TestEndpoint/{}", message_id);
        let raw = store.compare_exchange_value(None, &key).unwrap().unwrap();
        assert_eq!(raw.value["messageId"], message_id.as_str());
        assert_eq!(raw.value["dispatched"], false);
    }

    #[tokio::test]
    async fn test_unsafe_message_id_round_trips() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let message_id = format!(r"{}\12345", uuid::Uuid::new_v4());
        let operation = TransportOperation::new("test", Vec::new());

        store_and_commit(&outbox, OutboxMessage::new(message_id.clone(), vec![operation]))
            .await
            .unwrap();

        let found = outbox
            .get(&message_id, &OperationContext::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.message_id, message_id);
        assert_eq!(found.transport_operations.len(), 1);
        assert_eq!(found.transport_operations[0].message_id, "test");
    }

    // ============== Dispatch Tests ==============

    #[tokio::test]
    async fn test_set_as_dispatched_updates_flag() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();
        let message_id = uuid::Uuid::new_v4().simple().to_string();

        store_and_commit(&outbox, message_with_payload(&message_id))
            .await
            .unwrap();
        outbox.set_as_dispatched(&message_id, &context).await.unwrap();

        let record = outbox.get_record(&message_id, &context).await.unwrap().unwrap();
        assert!(record.dispatched);
        // Operations stay on the record, the pipeline view no longer hands them out
        assert_eq!(record.transport_operations.len(), 2);
        let message = outbox.get(&message_id, &context).await.unwrap().unwrap();
        assert!(message.transport_operations.is_empty());
    }

    #[tokio::test]
    async fn test_set_as_dispatched_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        store_and_commit(&outbox, message_with_payload("twice")).await.unwrap();
        outbox.set_as_dispatched("twice", &context).await.unwrap();
        outbox.set_as_dispatched("twice", &context).await.unwrap();

        let record = outbox.get_record("twice", &context).await.unwrap().unwrap();
        assert!(record.dispatched);
    }

    #[tokio::test]
    async fn test_set_as_dispatched_on_missing_record_is_a_no_op() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);
        let context = OperationContext::new();

        outbox.set_as_dispatched("ghost", &context).await.unwrap();
        assert!(outbox.get_record("ghost", &context).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatched_record_still_blocks_reprocessing() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store);

        store_and_commit(&outbox, OutboxMessage::new("done", vec![])).await.unwrap();
        outbox
            .set_as_dispatched("done", &OperationContext::new())
            .await
            .unwrap();

        let err = store_and_commit(&outbox, OutboxMessage::new("done", vec![]))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    // ============== Tenant Tests ==============

    #[tokio::test]
    async fn test_tenants_deduplicate_independently() {
        let store = InMemoryDocumentStore::new();
        let outbox = outbox(&store)
            .with_session_opener(Arc::new(TenantAwareSessionOpener::new("tenant-id")));

        for tenant in ["acme", "globex"] {
            let context = OperationContext::new().with_header("tenant-id", tenant);
            let mut transaction = outbox.begin_transaction(&context).await.unwrap();
            outbox
                .store(OutboxMessage::new("shared-id", vec![]), &mut transaction, &context)
                .await
                .unwrap();
            transaction.commit().await.unwrap();
        }

        let acme = OperationContext::new().with_header("tenant-id", "acme");
        assert!(outbox.get("shared-id", &acme).await.unwrap().is_some());
        assert!(outbox
            .get("shared-id", &OperationContext::new())
            .await
            .unwrap()
            .is_none());
    }
}
