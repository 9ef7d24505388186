//! Host configuration (tether.toml)

use serde::{Deserialize, Serialize};
use std::path::Path;
use tether_posix::MuxConfig;
use thiserror::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Errors that can occur while loading the config
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Bridge settings
    pub bridge: BridgeSection,

    /// Multiplexer sizing
    pub mux: MuxConfig,

    /// Address the echo service listens on
    pub listen: ListenSection,
}

/// `[bridge]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeSection {
    /// Build the bridge around an explicitly shared identity cache
    pub shared_cache: bool,
}

/// `[listen]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenSection {
    /// Host or address to bind
    pub host: String,

    /// Port to bind, 0 for any
    pub port: u16,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

impl HostConfig {
    /// Load config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else `tether.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mux
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("mux: {}", e)))?;
        if self.listen.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "listen.host cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
