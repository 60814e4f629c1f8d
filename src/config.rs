//! Node configuration: the options recognized by the external interfaces
//! (spec §6), loaded via the `config` crate with typed defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::BmError;

/// Protocol-level network constants (not user-configurable).
pub const NETWORK_NONCE_TRIALS_PER_BYTE_DEFAULT: u64 = 1000;
pub const NETWORK_EXTRA_BYTES_DEFAULT: u64 = 1000;
pub const DEFAULT_PORT: u16 = 8444;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_console: true,
        }
    }
}

/// Recognized node configuration, per spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub port: u16,
    pub connection_limit: usize,
    #[serde(with = "duration_secs")]
    pub connection_ttl: Duration,
    pub user_agent: String,
    pub streams: Vec<u64>,
    pub network_nonce_trials_per_byte: u64,
    pub network_extra_bytes: u64,
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connection_limit: 8,
            connection_ttl: Duration::from_secs(30 * 60),
            user_agent: "/bitmessage-core:0.1.0/".to_string(),
            streams: vec![1],
            network_nonce_trials_per_byte: NETWORK_NONCE_TRIALS_PER_BYTE_DEFAULT,
            network_extra_bytes: NETWORK_EXTRA_BYTES_DEFAULT,
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration, layering a file (if present) and environment
    /// variables prefixed `BM_` over the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, BmError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&NodeConfig::default()).map_err(|e| {
                BmError::FatalConfig(format!("could not seed default config: {e}"))
            })?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("BM").separator("__"));

        let settings = builder
            .build()
            .map_err(|e| BmError::FatalConfig(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| BmError::FatalConfig(format!("failed to parse config: {e}")))
    }

    pub fn validate(&self) -> Result<(), BmError> {
        if self.streams.is_empty() {
            return Err(BmError::FatalConfig(
                "at least one stream must be configured".into(),
            ));
        }
        if self.connection_limit == 0 {
            return Err(BmError::FatalConfig(
                "connection_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.port, 8444);
        assert_eq!(cfg.connection_limit, 8);
        assert_eq!(cfg.streams, vec![1]);
        assert_eq!(cfg.network_nonce_trials_per_byte, 1000);
        assert_eq!(cfg.network_extra_bytes, 1000);
    }

    #[test]
    fn rejects_empty_streams() {
        let mut cfg = NodeConfig::default();
        cfg.streams.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_without_a_file() {
        let cfg = NodeConfig::load(None).expect("defaults alone must load");
        assert_eq!(cfg.port, DEFAULT_PORT);
    }
}
