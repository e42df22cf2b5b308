use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::resolver::{ExpertiseMap, ResolutionStrategy};

/// Lower bound for the auto-sync interval.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Schedule syncs automatically (on registration and from the ticker).
    pub auto_sync: bool,
    /// Strategy used by full merges and the auto-sync cycle.
    pub default_strategy: ResolutionStrategy,
    /// Ticker period; floored at [`MIN_SYNC_INTERVAL`].
    pub sync_interval: Duration,
    /// Agents whose last sync is older than this are considered stale.
    pub staleness_threshold: Duration,
    /// Maximum queued messages before the oldest half is dropped.
    pub message_queue_capacity: usize,
    /// Finished sync operations retained for audit.
    pub sync_history_capacity: usize,
    /// Resolution records retained for audit.
    pub resolution_log_capacity: usize,
    /// Threads in the sync worker pool.
    pub sync_workers: usize,
    /// Maximum queued sync jobs.
    pub sync_queue_capacity: usize,
    /// Default wait for `requires_response` messages.
    pub response_timeout: Duration,
    /// Fail a full sync that leaves conflicts unresolved.
    pub fail_on_unresolved: bool,
    /// Context type to preferred agent role.
    pub expertise: ExpertiseMap,
    /// Where unregistered sessions are archived (feature `persistent`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            default_strategy: ResolutionStrategy::ConfidenceBased,
            sync_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(300),
            message_queue_capacity: 1000,
            sync_history_capacity: 256,
            resolution_log_capacity: 256,
            sync_workers: 2,
            sync_queue_capacity: 64,
            response_timeout: Duration::from_secs(5),
            fail_on_unresolved: false,
            expertise: ExpertiseMap::default(),
            archive_dir: None,
        }
    }
}

impl HubConfig {
    /// Rejects zero capacities.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let capacities = [
            ("message_queue_capacity", self.message_queue_capacity),
            ("sync_history_capacity", self.sync_history_capacity),
            ("resolution_log_capacity", self.resolution_log_capacity),
            ("sync_workers", self.sync_workers),
            ("sync_queue_capacity", self.sync_queue_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("{field} must be greater than zero"),
                });
            }
        }
        Ok(())
    }

    /// The ticker period actually used.
    #[must_use]
    pub fn effective_sync_interval(&self) -> Duration {
        self.sync_interval.max(MIN_SYNC_INTERVAL)
    }
}

/// The configuration fields reported by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfigSummary {
    /// See [`HubConfig::auto_sync`].
    pub auto_sync: bool,
    /// See [`HubConfig::default_strategy`].
    pub default_strategy: ResolutionStrategy,
    /// Effective ticker period in milliseconds.
    pub sync_interval_ms: u64,
    /// See [`HubConfig::message_queue_capacity`].
    pub message_queue_capacity: usize,
}

impl From<&HubConfig> for HubConfigSummary {
    fn from(config: &HubConfig) -> Self {
        Self {
            auto_sync: config.auto_sync,
            default_strategy: config.default_strategy,
            sync_interval_ms: config.effective_sync_interval().as_millis().min(u128::from(u64::MAX)) as u64,
            message_queue_capacity: config.message_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_is_floored() {
        let config = HubConfig {
            sync_interval: Duration::from_millis(10),
            ..HubConfig::default()
        };
        assert_eq!(config.effective_sync_interval(), MIN_SYNC_INTERVAL);
        assert_eq!(HubConfigSummary::from(&config).sync_interval_ms, 1000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = HubConfig {
            message_queue_capacity: 0,
            ..HubConfig::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidConfig { .. })));
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: HubConfig = serde_json::from_str(r#"{"auto_sync": false, "default_strategy": "temporal"}"#).unwrap();
        assert!(!config.auto_sync);
        assert_eq!(config.default_strategy, ResolutionStrategy::Temporal);
        assert_eq!(config.message_queue_capacity, 1000);
    }
}
