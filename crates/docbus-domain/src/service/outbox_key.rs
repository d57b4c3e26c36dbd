//! Record keys - How outbox and gateway records are addressed
//!
//! Keys have the form `Outbox/<endpoint>/<messageId>`. Endpoint names and
//! message ids may contain characters the store's key grammar rejects, and
//! either may contain `/`, so every segment is percent-encoded. `%` is
//! encoded too, which keeps the mapping injective: two different
//! (endpoint, message id) pairs never land on the same key.

use std::borrow::Cow;

use crate::model::endpoint::EndpointName;

pub const OUTBOX_KEY_PREFIX: &str = "Outbox";
pub const GATEWAY_KEY_PREFIX: &str = "GatewayMessages";

/// Key of the outbox record for a message processed by `endpoint`
pub fn outbox_record_key(endpoint: &EndpointName, message_id: &str) -> String {
    format!(
        "{}/{}/{}",
        OUTBOX_KEY_PREFIX,
        encode_key_segment(endpoint.as_str()),
        encode_key_segment(message_id)
    )
}

/// Key of the gateway deduplication record for a client message id
pub fn gateway_message_key(client_id: &str) -> String {
    format!("{}/{}", GATEWAY_KEY_PREFIX, encode_key_segment(client_id))
}

/// Percent-encode one key segment, borrowing when nothing needs encoding
pub fn encode_key_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}
