//! Configuration types for docbus

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

/// Persistence configuration for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Logical endpoint name; scopes outbox keys and timeout ownership
    pub endpoint_name: String,

    /// Incoming header that selects the tenant database, if any
    #[serde(default)]
    pub tenant_header: Option<String>,

    /// Timeout scanning and polling
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Timeout scanner and poller tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub trigger_cleanup_every_secs: u64,
    pub cleanup_gap_from_timeslice_secs: u64,
    /// Largest page requested from the timeout index
    pub max_page_size: usize,
    /// Next poll delay when no future timeout is known
    pub default_next_poll_secs: u64,
    /// Floor between two polls, guards against a persistently stale index
    pub min_poll_interval_millis: u64,
    pub dispatch_retry_delay_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            trigger_cleanup_every_secs: 120,
            cleanup_gap_from_timeslice_secs: 60,
            max_page_size: 1024,
            default_next_poll_secs: 600,
            min_poll_interval_millis: 1000,
            dispatch_retry_delay_secs: 5,
        }
    }
}

impl PersistenceConfig {
    /// Create a configuration with default timeout settings
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            tenant_header: None,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint_name.trim().is_empty() {
            return Err(PersistenceError::Config(
                "endpointName must not be empty".to_string(),
            ));
        }
        if self.timeouts.max_page_size == 0 {
            return Err(PersistenceError::Config(
                "timeouts.maxPageSize must be greater than zero".to_string(),
            ));
        }
        if self.timeouts.trigger_cleanup_every_secs == 0 {
            return Err(PersistenceError::Config(
                "timeouts.triggerCleanupEverySecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_parse() {
        let json = r#"{
            "endpointName": "Sales",
            "tenantHeader": "tenant-id",
            "timeouts": {
                "triggerCleanupEverySecs": 30,
                "maxPageSize": 128
            }
        }"#;

        let config = PersistenceConfig::from_json(json).unwrap();
        assert_eq!(config.endpoint_name, "Sales");
        assert_eq!(config.tenant_header.as_deref(), Some("tenant-id"));
        assert_eq!(config.timeouts.trigger_cleanup_every_secs, 30);
        assert_eq!(config.timeouts.max_page_size, 128);
        // Unspecified fields keep their defaults
        assert_eq!(config.timeouts.cleanup_gap_from_timeslice_secs, 60);
        assert_eq!(config.timeouts.default_next_poll_secs, 600);
    }

    #[test]
    fn test_timeouts_section_is_optional() {
        let config = PersistenceConfig::from_json(r#"{ "endpointName": "Billing" }"#).unwrap();
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert!(config.tenant_header.is_none());
    }

    #[test]
    fn test_validation_rejects_empty_endpoint() {
        let result = PersistenceConfig::from_json(r#"{ "endpointName": "  " }"#);
        assert!(matches!(result, Err(PersistenceError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_page_size() {
        let mut config = PersistenceConfig::new("Sales");
        config.timeouts.max_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "endpointName": "Shipping" }}"#).unwrap();

        let config = PersistenceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint_name, "Shipping");
    }

    #[test]
    fn test_from_missing_file() {
        let result = PersistenceConfig::from_file(std::path::Path::new("/nonexistent/docbus.json"));
        assert!(matches!(result, Err(PersistenceError::Io(_))));
    }
}
