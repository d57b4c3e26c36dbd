//! Per-call context passed explicitly to every persistence operation

use std::collections::HashMap;

/// What the pipeline knows about the message being processed
///
/// Replaces an ambient context bag: operations receive it as a parameter.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    headers: HashMap<String, String>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an incoming message with these headers
    pub fn from_headers(headers: HashMap<String, String>) -> Self {
        Self { headers }
    }

    /// Builder: add an incoming header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|v| v.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============== Header Tests ==============

    #[test]
    fn test_from_headers_exposes_incoming_headers() {
        let headers = HashMap::from([("tenant-id".to_string(), "acme".to_string())]);
        let context = OperationContext::from_headers(headers).with_header("message-id", "m-1");

        assert_eq!(context.header("tenant-id"), Some("acme"));
        assert_eq!(context.header("message-id"), Some("m-1"));
        assert_eq!(context.header("missing"), None);
        assert_eq!(context.headers().len(), 2);
    }
}
