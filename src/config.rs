//! Configuration management for the admission service.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `ADMISSION__`-prefixed environment variables (`ADMISSION__SERVER__LISTEN_ADDR`,
//! `ADMISSION__ADMISSION__RETENTION_SECS`, ...).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{AdmissionError, Result};
use crate::ratelimit::{PolicyTable, WindowPolicy};

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "ADMISSION";
/// Separator between the prefix and nested keys.
const ENV_SEPARATOR: &str = "__";
/// Upper bound on `retention_secs`: one year.
const MAX_RETENTION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the admission service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// How often idle request logs are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long request timestamps are retained, in seconds
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Per-preset policy overrides, keyed by preset name
    #[serde(default)]
    pub presets: HashMap<String, WindowPolicy>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
            presets: HashMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_retention() -> u64 {
    3600
}

impl AdmissionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// The preset policies with overrides applied.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::with_overrides(&self.presets)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.admission.sweep_interval_secs == 0 {
            return Err(AdmissionError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.admission.retention_secs == 0 {
            return Err(AdmissionError::Config(
                "retention_secs must be positive".to_string(),
            ));
        }
        if self.admission.retention_secs > MAX_RETENTION_SECS {
            return Err(AdmissionError::Config(format!(
                "retention_secs must not exceed {}",
                MAX_RETENTION_SECS
            )));
        }

        let longest = self.admission.policy_table()?.longest_window();
        if self.admission.retention() < longest {
            return Err(AdmissionError::Config(format!(
                "retention_secs ({}) is shorter than the longest preset window ({}s)",
                self.admission.retention_secs,
                longest.as_secs()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Preset;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.admission.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.admission.retention(), Duration::from_secs(3600));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.admission.policy_table().unwrap(), PolicyTable::new());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
admission:
  sweep_interval_secs: 60
  presets:
    auth:
      max_requests: 3
      window_ms: 600000
logging:
  format: json
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.admission.sweep_interval_secs, 60);
        assert_eq!(config.logging.format, LogFormat::Json);

        let table = config.admission.policy_table().unwrap();
        assert_eq!(table.get(Preset::Auth).max_requests(), 3);
        assert_eq!(table.get(Preset::Api), Preset::Api.default_policy());
    }

    #[test]
    fn test_file_and_env_layering() {
        let path = std::env::temp_dir().join(format!("admission-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "server:\n  listen_addr: 127.0.0.1:7000\nadmission:\n  retention_secs: 7200\n",
        )
        .unwrap();

        let config = AppConfig::load_with_env(
            Some(&path),
            env(&[
                ("ADMISSION__SERVER__LISTEN_ADDR", "127.0.0.1:7001"),
                ("ADMISSION__LOGGING__LEVEL", "debug"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.listen_addr.port(), 7001);
        assert_eq!(config.admission.retention_secs, 7200);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("admission-does-not-exist.yaml");
        assert!(matches!(
            AppConfig::load_with_env(Some(&path), env(&[])),
            Err(AdmissionError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_policy() {
        let yaml = r#"
admission:
  presets:
    write:
      max_requests: 0
      window_ms: 60000
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_preset() {
        let yaml = r#"
admission:
  presets:
    bulk:
      max_requests: 5
      window_ms: 60000
"#;
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(AdmissionError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_rejects_short_retention() {
        let yaml = r#"
admission:
  retention_secs: 600
"#;
        // The auth preset window is 15 minutes
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(AdmissionError::Config(msg)) if msg.contains("retention_secs")
        ));
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let yaml = r#"
admission:
  sweep_interval_secs: 0
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_oversized_retention() {
        let yaml = format!("admission:\n  retention_secs: {}\n", MAX_RETENTION_SECS + 1);
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(AdmissionError::Config(msg)) if msg.contains("must not exceed")
        ));

        let yaml = format!("admission:\n  retention_secs: {}\n", MAX_RETENTION_SECS);
        assert!(AppConfig::from_yaml(&yaml).is_ok());
    }
}
