//! Gateway Deduplication - Drop messages a remote site sent twice
//!
//! Same mechanism as the outbox: a create-if-absent compare-exchange
//! write per client message id. Losing the commit race means the message
//! was already received.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use docbus_domain::model::context::OperationContext;
use docbus_domain::model::gateway::GatewayMessage;
use docbus_domain::repository::document_store::DocumentStore;
use docbus_domain::service::outbox_key::gateway_message_key;
use shared::Result;

use crate::session_opener::{DefaultSessionOpener, SessionOpener};

pub struct GatewayDeduplication {
    store: Arc<dyn DocumentStore>,
    opener: Arc<dyn SessionOpener>,
}

impl GatewayDeduplication {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            opener: Arc::new(DefaultSessionOpener),
        }
    }

    pub fn with_session_opener(mut self, opener: Arc<dyn SessionOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Record the message as received
    ///
    /// Returns `true` the first time a client id is seen, `false` for a
    /// duplicate.
    pub async fn deduplicate_message(
        &self,
        client_id: &str,
        time_received: DateTime<Utc>,
        context: &OperationContext,
    ) -> Result<bool> {
        let key = gateway_message_key(client_id);
        let record = GatewayMessage {
            client_id: client_id.to_string(),
            time_received,
        };

        let mut session = self
            .store
            .open_session(&self.opener.session_options(context))
            .await?;
        session.create_compare_exchange(&key, serde_json::to_value(&record)?)?;

        match session.save_changes().await {
            Ok(()) => Ok(true),
            Err(err) if err.is_concurrency() => {
                debug!(key = %key, "Duplicate gateway message");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
