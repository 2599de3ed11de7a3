use crate::error::ConfigError;
use crate::version::{ClusterVersion, ServerVersion, MIN_CLUSTER_VERSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CLUSTER_VERSION_INTERVAL_MS: u64 = 5_000;
const DEFAULT_STORAGE_VERSION_INTERVAL_MS: u64 = 5_000;
const DEFAULT_DOWNGRADE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_PROPOSAL_TIMEOUT_MS: u64 = 5_000;

/// Monitor settings as loaded from JSON. Every field except `local_version`
/// is optional in the document; the running binary's version has no
/// meaningful default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub local_version: String,
    pub min_cluster_version: ClusterVersion,
    pub cluster_version_interval_ms: u64,
    pub storage_version_interval_ms: u64,
    pub downgrade_interval_ms: u64,
    pub proposal_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            local_version: String::new(),
            min_cluster_version: MIN_CLUSTER_VERSION,
            cluster_version_interval_ms: DEFAULT_CLUSTER_VERSION_INTERVAL_MS,
            storage_version_interval_ms: DEFAULT_STORAGE_VERSION_INTERVAL_MS,
            downgrade_interval_ms: DEFAULT_DOWNGRADE_INTERVAL_MS,
            proposal_timeout_ms: DEFAULT_PROPOSAL_TIMEOUT_MS,
        }
    }
}

impl MonitorConfig {
    pub fn for_local_version(local_version: impl Into<String>) -> Self {
        Self {
            local_version: local_version.into(),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_local_version()?;
        for (field, value) in [
            ("cluster_version_interval_ms", self.cluster_version_interval_ms),
            ("storage_version_interval_ms", self.storage_version_interval_ms),
            ("downgrade_interval_ms", self.downgrade_interval_ms),
            ("proposal_timeout_ms", self.proposal_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    pub fn parsed_local_version(&self) -> Result<ServerVersion, ConfigError> {
        if self.local_version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "local_version",
                reason: "must be set to the running server version".into(),
            });
        }
        ServerVersion::parse(&self.local_version).map_err(|err| ConfigError::Invalid {
            field: "local_version",
            reason: err.to_string(),
        })
    }

    pub fn cluster_version_interval(&self) -> Duration {
        Duration::from_millis(self.cluster_version_interval_ms)
    }

    pub fn storage_version_interval(&self) -> Duration {
        Duration::from_millis(self.storage_version_interval_ms)
    }

    pub fn downgrade_interval(&self) -> Duration {
        Duration::from_millis(self.downgrade_interval_ms)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }
}
