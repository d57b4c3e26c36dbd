//! Timeout - A scheduled wake-up discovered by the scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::EndpointName;

/// A persisted timeout as seen through the timeout index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutEntry {
    pub id: String,
    /// When the timeout is due
    pub time: DateTime<Utc>,
    /// Owning endpoint; empty means any endpoint may claim it
    #[serde(default)]
    pub owning_owner: String,
}

impl TimeoutEntry {
    /// Create an unowned timeout
    pub fn new(id: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            time,
            owning_owner: String::new(),
        }
    }

    /// Builder: restrict the timeout to one endpoint
    pub fn owned_by(mut self, endpoint: &EndpointName) -> Self {
        self.owning_owner = endpoint.as_str().to_string();
        self
    }

    pub fn is_unowned(&self) -> bool {
        self.owning_owner.is_empty()
    }

    /// Unowned timeouts are visible to every endpoint, owned ones only to their owner
    pub fn is_visible_to(&self, endpoint: &EndpointName) -> bool {
        self.is_unowned() || self.owning_owner == endpoint.as_str()
    }
}

/// Result of one scanner pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutsChunk {
    /// Due timeouts, cleanup results first, then the main scan in due order
    pub due_timeouts: Vec<TimeoutEntry>,
    /// When the caller should scan again
    pub next_poll_time: DateTime<Utc>,
}

impl TimeoutsChunk {
    pub fn new(due_timeouts: Vec<TimeoutEntry>, next_poll_time: DateTime<Utc>) -> Self {
        Self {
            due_timeouts,
            next_poll_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.due_timeouts.is_empty()
    }

    /// Latest due time in the chunk
    pub fn latest_due_time(&self) -> Option<DateTime<Utc>> {
        self.due_timeouts.iter().map(|t| t.time).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_visibility() {
        let sales = EndpointName::new("Sales");
        let billing = EndpointName::new("Billing");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let unowned = TimeoutEntry::new("t-1", at);
        assert!(unowned.is_visible_to(&sales));
        assert!(unowned.is_visible_to(&billing));

        let owned = TimeoutEntry::new("t-2", at).owned_by(&sales);
        assert!(owned.is_visible_to(&sales));
        assert!(!owned.is_visible_to(&billing));
    }

    #[test]
    fn test_latest_due_time() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap();

        let chunk = TimeoutsChunk::new(
            vec![TimeoutEntry::new("a", late), TimeoutEntry::new("b", early)],
            late,
        );
        assert_eq!(chunk.latest_due_time(), Some(late));
        assert_eq!(TimeoutsChunk::new(vec![], late).latest_due_time(), None);
    }
}
