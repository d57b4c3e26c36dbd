//! Gateway deduplication record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marks a message received through the gateway as already seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMessage {
    pub client_id: String,
    pub time_received: DateTime<Utc>,
}
