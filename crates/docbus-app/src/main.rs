//! # docbus - Outbox and timeout persistence over a document store
//!
//! Composition root: wires the in-memory store into the use cases and
//! walks through one round of message processing and timeout polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  main.rs (this file) - Dependency Injection & Wiring           │
//! │    │                                                            │
//! │    ├── Creates: InMemoryDocumentStore (adapter)                │
//! │    ├── Creates: OutboxStore, GatewayDeduplication (use cases)  │
//! │    ├── Creates: TimeoutScanner + TimeoutPoller (use cases)     │
//! │    └── Runs: Message processing, then the timeout poller       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Set `DOCBUS_CONFIG` to a JSON configuration file to override the
//! defaults, and `RUST_LOG` to change the log level.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docbus_adapter::InMemoryDocumentStore;
use docbus_domain::model::context::OperationContext;
use docbus_domain::model::endpoint::EndpointName;
use docbus_domain::model::outbox::{OutboxMessage, TransportOperation};
use docbus_domain::model::timeout::TimeoutEntry;
use docbus_usecase::{
    DefaultSessionOpener, GatewayDeduplication, OutboxStore, SessionOpener, StorageSession,
    TenantAwareSessionOpener, TimeoutDispatcher, TimeoutPoller, TimeoutPollerSettings,
    TimeoutScanner, TimeoutScannerSettings,
};
use shared::PersistenceConfig;

const CONFIG_ENV: &str = "DOCBUS_CONFIG";

fn load_config() -> anyhow::Result<PersistenceConfig> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => PersistenceConfig::from_file(Path::new(&path))
            .with_context(|| format!("Failed to load configuration from {}", path)),
        Err(_) => Ok(PersistenceConfig::new("Sales")),
    }
}

/// Hands due timeouts to the log and deletes them
struct LoggingDispatcher {
    store: InMemoryDocumentStore,
}

#[async_trait]
impl TimeoutDispatcher for LoggingDispatcher {
    async fn dispatch(&self, timeout: &TimeoutEntry) -> shared::Result<()> {
        info!("   ⏰ Timeout due: {} (at {})", timeout.id, timeout.time);
        self.store.remove_timeout(&timeout.id)?;
        Ok(())
    }
}

/// Process one incoming message exactly once
///
/// Returns whether this attempt did the work.
async fn process_message(
    outbox: &OutboxStore,
    message_id: &str,
    context: &OperationContext,
) -> anyhow::Result<bool> {
    if let Some(existing) = outbox.get(message_id, context).await? {
        if existing.transport_operations.is_empty() {
            info!("   ↺ {} already processed and dispatched", message_id);
            return Ok(false);
        }
    }

    let mut transaction = outbox.begin_transaction(context).await?;

    // Handler: business data joins the outbox transaction
    let mut storage = StorageSession::adapt(&mut transaction)?;
    storage.session().store_document(
        &format!("orders/{}", message_id),
        serde_json::json!({ "state": "accepted", "acceptedAt": Utc::now() }),
    )?;
    storage.complete().await?;

    let operations = vec![TransportOperation::new(
        uuid::Uuid::new_v4().to_string(),
        b"{\"orderAccepted\":true}".to_vec(),
    )
    .with_header("NServiceBus.EnclosedMessageTypes", "OrderAccepted")
    .with_option("Destination", "Billing")];
    outbox
        .store(OutboxMessage::new(message_id, operations.clone()), &mut transaction, context)
        .await?;

    match transaction.commit().await {
        Ok(()) => {}
        Err(err) if err.is_concurrency() => {
            info!("   ↺ {} is handled by another attempt", message_id);
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    }

    for operation in &operations {
        info!("   → Sending {} ({} bytes)", operation.message_id, operation.body.len());
    }
    outbox.set_as_dispatched(message_id, context).await?;
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("📬 docbus - Outbox & Timeout Persistence");
    info!("");

    // ========================================
    // Dependency Injection - Wire up the system
    // ========================================

    let config = load_config()?;
    let endpoint = EndpointName::new(config.endpoint_name.clone());
    info!("   Endpoint: {}", endpoint);

    // Adapter (could be swapped for a networked document database)
    let store = InMemoryDocumentStore::new();

    let opener: Arc<dyn SessionOpener> = match &config.tenant_header {
        Some(header) => Arc::new(TenantAwareSessionOpener::new(header.clone())),
        None => Arc::new(DefaultSessionOpener),
    };

    let outbox = OutboxStore::new(Arc::new(store.clone()), endpoint.clone())
        .with_session_opener(Arc::clone(&opener));
    let gateway = GatewayDeduplication::new(Arc::new(store.clone())).with_session_opener(opener);

    // ========================================
    // Outbox - the same message delivered twice
    // ========================================

    info!("");
    info!("📨 Processing a message delivered twice...");

    let message_id = uuid::Uuid::new_v4().to_string();
    let mut headers = HashMap::from([("message-id".to_string(), message_id.clone())]);
    if let Some(header) = &config.tenant_header {
        headers.insert(header.clone(), "demo-tenant".to_string());
    }
    let context = OperationContext::from_headers(headers);
    for attempt in 1..=2 {
        let processed = process_message(&outbox, &message_id, &context).await?;
        info!("   Attempt {}: processed = {}", attempt, processed);
    }

    // ========================================
    // Gateway deduplication
    // ========================================

    info!("");
    info!("🌐 Gateway deduplication...");

    let client_id = format!("{}\\1", uuid::Uuid::new_v4());
    for attempt in 1..=2 {
        let first_time = gateway
            .deduplicate_message(&client_id, Utc::now(), &context)
            .await?;
        info!("   Attempt {}: first time seen = {}", attempt, first_time);
    }

    // ========================================
    // Timeouts
    // ========================================

    info!("");
    info!("⏱️  Starting timeout poller...");

    let now = Utc::now();
    store.add_timeout(TimeoutEntry::new(
        "reminder-overdue",
        now - chrono::Duration::minutes(5),
    ))?;
    store.add_timeout(
        TimeoutEntry::new("reminder-due", now - chrono::Duration::seconds(1)).owned_by(&endpoint),
    )?;
    store.add_timeout(
        TimeoutEntry::new("other-endpoint", now).owned_by(&EndpointName::new("Billing")),
    )?;

    let scanner = TimeoutScanner::new(
        Arc::new(store.clone()),
        endpoint.clone(),
        TimeoutScannerSettings::from(&config.timeouts),
    );
    let poller = Arc::new(TimeoutPoller::new(
        Arc::new(scanner),
        Arc::new(LoggingDispatcher {
            store: store.clone(),
        }),
        TimeoutPollerSettings::from(&config.timeouts),
    ));

    let running = {
        let poller = Arc::clone(&poller);
        tokio::spawn(async move { poller.run(now - chrono::Duration::seconds(30)).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;

    let due = Utc::now() + chrono::Duration::milliseconds(200);
    store.add_timeout(TimeoutEntry::new("reminder-new", due))?;
    poller.notify_new_timeout(due);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    poller.shutdown();
    running.await?;

    info!("");
    info!("📬 docbus demo complete!");
    Ok(())
}
