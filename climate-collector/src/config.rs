use crate::dedup::DuplicatePolicy;
use climate_shared::topics::{MULTI_LEVEL_WILDCARD, TOPIC_ROOT};
use climate_shared::{MessageKind, MqttSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "CLIMATE_COLLECTOR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "collector.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid collector config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid collector config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub mqtt: MqttSettings,
    pub topics: TopicPatterns,
    pub store: StoreConf,
    pub duplicates: DuplicatePolicy,
    /// Pause before connecting, lets the broker come up first
    pub startup_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TopicPatterns {
    pub telemetry: String,
    pub commands: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Jsonl,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConf {
    pub backend: StoreBackend,
    /// Directory holding the `.jsonl` tables
    pub path: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            topics: TopicPatterns::default(),
            store: StoreConf::default(),
            duplicates: DuplicatePolicy::default(),
            startup_delay_secs: 0,
        }
    }
}

impl Default for TopicPatterns {
    fn default() -> Self {
        Self {
            telemetry: MessageKind::Telemetry.wildcard(),
            commands: MessageKind::Commands.wildcard(),
            status: MessageKind::Status.wildcard(),
        }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Jsonl,
            path: PathBuf::from("./data"),
        }
    }
}

impl TopicPatterns {
    pub fn all(&self) -> [&str; 3] {
        [self.telemetry.as_str(), self.commands.as_str(), self.status.as_str()]
    }

    fn by_kind(&self) -> [(MessageKind, &str); 3] {
        [
            (MessageKind::Telemetry, self.telemetry.as_str()),
            (MessageKind::Commands, self.commands.as_str()),
            (MessageKind::Status, self.status.as_str()),
        ]
    }
}

/// Only `devices/<id or +>/<kind>` filters deliver topics the collector can route
fn check_pattern(kind: MessageKind, pattern: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = pattern.split('/').collect();
    let routable = matches!(
        parts.as_slice(),
        [root, device, last]
            if *root == TOPIC_ROOT
                && !device.is_empty()
                && *device != MULTI_LEVEL_WILDCARD
                && *last == kind.as_str()
    );
    if routable {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} pattern '{}' must look like {}",
            kind,
            pattern,
            kind.wildcard()
        )))
    }
}

impl CollectorConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, pattern) in self.topics.by_kind() {
            if pattern.trim().is_empty() {
                return Err(ConfigError::Invalid("topic patterns cannot be empty".into()));
            }
            check_pattern(kind, pattern)?;
        }
        if let DuplicatePolicy::Window { capacity: 0 } = self.duplicates {
            return Err(ConfigError::Invalid("duplicate window capacity must be positive".into()));
        }
        Ok(())
    }
}

pub fn config_file_path() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into())
        .into()
}

/// Reads `$CLIMATE_COLLECTOR_CONFIG`, then applies the broker env overrides
pub async fn load_config() -> Result<CollectorConfig, ConfigError> {
    let mut cfg = load_config_from(&config_file_path()).await?;
    cfg.mqtt.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config_from(path: &Path) -> Result<CollectorConfig, ConfigError> {
    if !path.exists() {
        warn!("No {}, using default collector config", path.display());
        return Ok(CollectorConfig::default());
    }

    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(CollectorConfig::default());
    }

    let cfg = serde_yaml::from_str(&txt).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Loaded collector config from {}", path.display());
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_device_topics() {
        let cfg = CollectorConfig::default();
        assert_eq!(
            cfg.topics.all(),
            ["devices/+/telemetry", "devices/+/commands", "devices/+/status"]
        );
        assert_eq!(cfg.duplicates, DuplicatePolicy::Disabled);
        assert_eq!(cfg.startup_delay(), Duration::ZERO);
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
mqtt:
  host: broker.lan
topics:
  telemetry: "devices/SIM-001/telemetry"
store:
  backend: memory
duplicates:
  mode: window
  capacity: 64
startup_delay_secs: 5
"#
        )
        .unwrap();

        let cfg = load_config_from(file.path()).await.unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.topics.telemetry, "devices/SIM-001/telemetry");
        assert_eq!(cfg.topics.status, "devices/+/status");
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.duplicates, DuplicatePolicy::Window { capacity: 64 });
        assert_eq!(cfg.startup_delay_secs, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unroutable_patterns_are_rejected() {
        let invalid = [
            ("plant/+/telemetry", "devices/+/status", "devices/+/commands"),
            ("devices/+/status", "devices/+/commands", "devices/+/status"),
            ("devices/#", "devices/+/commands", "devices/+/status"),
            ("devices/+/telemetry", "devices//commands", "devices/+/status"),
            ("devices/+/telemetry", "devices/+/commands", "devices/+/status/extra"),
        ];

        for (telemetry, commands, status) in invalid {
            let mut cfg = CollectorConfig::default();
            cfg.topics = TopicPatterns {
                telemetry: telemetry.into(),
                commands: commands.into(),
                status: status.into(),
            };
            assert!(
                matches!(cfg.validate(), Err(ConfigError::Invalid(_))),
                "{:?} should be rejected",
                cfg.topics
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "store: [not, a, map]").unwrap();
        assert!(matches!(
            load_config_from(file.path()).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_or_empty_file_uses_defaults() {
        let cfg = load_config_from(Path::new("/nonexistent/collector.yaml")).await.unwrap();
        assert_eq!(cfg, CollectorConfig::default());

        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = load_config_from(file.path()).await.unwrap();
        assert_eq!(cfg, CollectorConfig::default());
    }
}
