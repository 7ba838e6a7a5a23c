//! Operator configuration
//!
//! Defaults suit a single deployment; a JSON file or `FLEET_TRUST_*`
//! environment variables override them.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_CHALLENGE_TTL: &str = "FLEET_TRUST_CHALLENGE_TTL";
pub const ENV_SWEEP_INTERVAL: &str = "FLEET_TRUST_SWEEP_INTERVAL";
pub const ENV_SECRET_PREFIX: &str = "FLEET_TRUST_SECRET_PREFIX";
pub const ENV_STORE_DIR: &str = "FLEET_TRUST_STORE_DIR";

/// Configuration for the trust core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// How long an issued challenge stays consumable (seconds)
    pub challenge_ttl_secs: u64,
    /// How often the sweeper drops expired challenges (seconds)
    pub sweep_interval_secs: u64,
    /// Name prefix for per-node secrets in the secret store
    pub secret_prefix: String,
    /// Directory used by the file-backed secret store
    pub store_dir: String,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: 60,
            sweep_interval_secs: 30,
            secret_prefix: "node-key-".to_string(),
            store_dir: "fleet-trust-secrets".to_string(),
        }
    }
}

impl TrustConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: TrustConfig =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_CHALLENGE_TTL) {
            self.challenge_ttl_secs = parse_secs(ENV_CHALLENGE_TTL, &v)?;
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL) {
            self.sweep_interval_secs = parse_secs(ENV_SWEEP_INTERVAL, &v)?;
        }
        if let Some(v) = lookup(ENV_SECRET_PREFIX) {
            self.secret_prefix = v;
        }
        if let Some(v) = lookup(ENV_STORE_DIR) {
            self.store_dir = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.challenge_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "challenge_ttl_secs".into(),
                value: "0".into(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_secs".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn challenge_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.challenge_ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_secs(field: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(String),

    #[error("Cannot parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CHALLENGE_TTL, "120"),
            (ENV_SECRET_PREFIX, "disk-"),
        ]
        .into_iter()
        .collect();

        let config = TrustConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.challenge_ttl_secs, 120);
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.secret_prefix, "disk-");
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let result = TrustConfig::default().with_overrides(|k| {
            (k == ENV_SWEEP_INTERVAL).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = TrustConfig::default()
            .with_overrides(|k| (k == ENV_CHALLENGE_TTL).then(|| "0".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let path = std::env::temp_dir().join(format!("fleet-trust-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"challenge_ttl_secs": 15}"#).unwrap();

        let config = TrustConfig::load(&path).unwrap();
        assert_eq!(config.challenge_ttl_secs, 15);
        assert_eq!(config.secret_prefix, "node-key-");

        let _ = std::fs::remove_file(&path);
    }
}
