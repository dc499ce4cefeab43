//! Engine configuration.
//!
//! An explicit configuration object handed to the builder; no ambient
//! global state. Validation runs once at construction and a rejected
//! configuration constructs nothing.

use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_GRANULARITY_SECS: u64 = 60;
pub const DEFAULT_EXPIRATION_SECS: u64 = 60 * 60 * 2;

const DEFAULT_STORE_CONNECTION: &str = "redis://127.0.0.1/";

/// Process-wide settings for the counter engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TallyConfig {
    /// Store connection URL.
    #[serde(default = "default_store_connection")]
    pub store_connection: String,

    /// Optional namespace prepended to every key the engine touches.
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Width of one slice, in seconds.
    #[serde(default = "default_granularity")]
    pub granularity: u64,

    /// How long a slice's data stays readable after its first write, in
    /// seconds. Must exceed the granularity.
    #[serde(default = "default_expiration")]
    pub expiration: u64,
}

fn default_store_connection() -> String {
    DEFAULT_STORE_CONNECTION.to_string()
}

fn default_granularity() -> u64 {
    DEFAULT_GRANULARITY_SECS
}

fn default_expiration() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            store_connection: default_store_connection(),
            key_prefix: None,
            granularity: DEFAULT_GRANULARITY_SECS,
            expiration: DEFAULT_EXPIRATION_SECS,
        }
    }
}

impl TallyConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let loaded: Self = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check the granularity/expiration relationship.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.granularity == 0 {
            return Err(ConfigError::ZeroGranularity);
        }

        if self.expiration <= self.granularity {
            return Err(ConfigError::ExpirationTooShort {
                granularity: self.granularity,
                expiration: self.expiration,
            });
        }

        Ok(())
    }

    pub fn granularity_duration(&self) -> Duration {
        Duration::from_secs(self.granularity)
    }

    pub fn expiration_duration(&self) -> Duration {
        Duration::from_secs(self.expiration)
    }
}
