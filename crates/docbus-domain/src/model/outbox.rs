//! Outbox - The deduplication record for an incoming message
//!
//! An `OutboxMessage` is what the messaging pipeline hands us: the id of the
//! incoming message and the transport operations its handlers produced.
//! An `OutboxRecord` is how that message is persisted, plus the dispatched
//! flag. Exactly one record may exist per endpoint and message id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An outgoing operation produced while handling a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOperation {
    pub message_id: String,
    /// Serialized message body, opaque to persistence
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Dispatch options (destination, delivery constraints)
    pub options: HashMap<String, String>,
}

impl TransportOperation {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            headers: HashMap::new(),
            options: HashMap::new(),
        }
    }

    /// Builder: add a message header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builder: add a dispatch option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// The set of operations to dispatch for one incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub message_id: String,
    pub transport_operations: Vec<TransportOperation>,
}

impl OutboxMessage {
    pub fn new(message_id: impl Into<String>, transport_operations: Vec<TransportOperation>) -> Self {
        Self {
            message_id: message_id.into(),
            transport_operations,
        }
    }
}

/// Persisted shape of a transport operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxOperation {
    pub message_id: String,
    /// Message body, stored as a base64 string
    #[serde(with = "base64_body")]
    pub message: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Persisted outbox record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub message_id: String,
    pub dispatched: bool,
    #[serde(default)]
    pub transport_operations: Vec<OutboxOperation>,
}

impl OutboxRecord {
    /// Mark the record as dispatched
    ///
    /// Returns false when it already was.
    pub fn mark_dispatched(&mut self) -> bool {
        let changed = !self.dispatched;
        self.dispatched = true;
        changed
    }

    /// Convert back to the pipeline's view
    ///
    /// A dispatched record has nothing left to send, so its operations
    /// are not handed out again.
    pub fn into_message(self) -> OutboxMessage {
        let transport_operations = if self.dispatched {
            Vec::new()
        } else {
            self.transport_operations
                .into_iter()
                .map(TransportOperation::from)
                .collect()
        };
        OutboxMessage {
            message_id: self.message_id,
            transport_operations,
        }
    }
}

impl From<OutboxMessage> for OutboxRecord {
    fn from(message: OutboxMessage) -> Self {
        Self {
            message_id: message.message_id,
            dispatched: false,
            transport_operations: message
                .transport_operations
                .into_iter()
                .map(OutboxOperation::from)
                .collect(),
        }
    }
}

impl From<TransportOperation> for OutboxOperation {
    fn from(op: TransportOperation) -> Self {
        Self {
            message_id: op.message_id,
            message: op.body,
            headers: op.headers,
            options: op.options,
        }
    }
}

impl From<OutboxOperation> for TransportOperation {
    fn from(op: OutboxOperation) -> Self {
        Self {
            message_id: op.message_id,
            body: op.message,
            headers: op.headers,
            options: op.options,
        }
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}
