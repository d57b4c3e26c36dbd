//! Session Opener - Which database a message's session targets

use docbus_domain::model::context::OperationContext;
use docbus_domain::repository::document_store::SessionOptions;

/// Chooses session options for the message being processed
pub trait SessionOpener: Send + Sync {
    fn session_options(&self, context: &OperationContext) -> SessionOptions;
}

/// Always the store's default database
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSessionOpener;

impl SessionOpener for DefaultSessionOpener {
    fn session_options(&self, _context: &OperationContext) -> SessionOptions {
        SessionOptions::default()
    }
}

/// Picks the database named by an incoming header
///
/// Messages without the header use the default database.
#[derive(Debug, Clone)]
pub struct TenantAwareSessionOpener {
    header: String,
}

impl TenantAwareSessionOpener {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl SessionOpener for TenantAwareSessionOpener {
    fn session_options(&self, context: &OperationContext) -> SessionOptions {
        match context.header(&self.header) {
            Some(tenant) if !tenant.is_empty() => SessionOptions::for_database(tenant),
            _ => SessionOptions::default(),
        }
    }
}
