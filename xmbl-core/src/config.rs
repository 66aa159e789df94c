//! Runtime configuration: the recognized keys from spec.md §6, loaded from
//! a YAML file with environment-variable overrides, in the teacher's
//! `NodeConfig` idiom minus its secrets-manager integration (out of scope —
//! no external secret store is part of these three subsystems).

use crate::error::{XmblError, XmblResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub port: u16,
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 30303,
            bootstrap: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(rename = "dbPath")]
    pub db_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: "./xmbl-data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    #[serde(rename = "totalShards")]
    pub total_shards: u32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self { total_shards: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(rename = "requiredValidations")]
    pub required_validations: u32,
    #[serde(rename = "rawTTL")]
    pub raw_ttl_ms: u64,
    #[serde(rename = "processingTTL")]
    pub processing_ttl_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            required_validations: 3,
            raw_ttl_ms: 60_000,
            processing_ttl_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity: 10 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "maxRequests")]
    pub max_requests: u32,
    #[serde(rename = "windowMs")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Node configuration. Recognized keys exactly match spec.md §6; anything
/// else in a loaded file is ignored rather than rejected, so operators can
/// keep unrelated settings alongside these in one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default, rename = "stateMachine")]
    pub state_machine: StateMachineConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Loads from a YAML file, then applies `XMBL_*` environment overrides
    /// for the handful of settings operators most often need to flip
    /// without editing the file (port, db path, log level).
    pub fn load(path: impl AsRef<Path>) -> XmblResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading runtime configuration");
        let contents = std::fs::read_to_string(path).map_err(|e| XmblError::IoError(e.to_string()))?;
        let mut config: RuntimeConfig =
            serde_yaml::from_str(&contents).map_err(|e| XmblError::InvalidState(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("XMBL_NETWORK_PORT") {
            match port.parse() {
                Ok(p) => self.network.port = p,
                Err(_) => warn!(value = %port, "ignoring invalid XMBL_NETWORK_PORT"),
            }
        }
        if let Ok(db_path) = std::env::var("XMBL_LEDGER_DB_PATH") {
            self.ledger.db_path = db_path;
        }
        if let Ok(level) = std::env::var("XMBL_LOGGING_LEVEL") {
            self.logging.level = level;
        }
        debug!(?self, "runtime configuration resolved");
    }

    pub fn validate(&self) -> XmblResult<()> {
        if self.network.port == 0 {
            return Err(XmblError::InvalidState("network.port cannot be 0".into()));
        }
        if self.state_machine.total_shards == 0 {
            return Err(XmblError::InvalidState("stateMachine.totalShards cannot be 0".into()));
        }
        if self.consensus.required_validations == 0 {
            return Err(XmblError::InvalidState(
                "consensus.requiredValidations cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.network.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_yaml_and_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "network:\n  port: 9000\nconsensus:\n  requiredValidations: 5\n  rawTTL: 10000\n  processingTTL: 20000\n",
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.consensus.required_validations, 5);
        assert_eq!(config.storage.capacity, StorageConfig::default().capacity);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "network:\n  port: 9000\n").unwrap();

        std::env::set_var("XMBL_NETWORK_PORT", "7070");
        let config = RuntimeConfig::load(&path).unwrap();
        std::env::remove_var("XMBL_NETWORK_PORT");

        assert_eq!(config.network.port, 7070);
    }
}
