//! Configuration management for headsetd
//!
//! Handles loading and validation of the JSON configuration file.
//! Configuration is stored at `~/.config/headsetd/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capabilities::CAPABILITIES_FILE;

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "headsetd";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capability table path (default: next to the config file)
    #[serde(default)]
    pub capabilities_file: Option<PathBuf>,

    /// Drop Docked/Undocked/TakenOff/PutOn events coming from the startup poll
    #[serde(default)]
    pub suppress_initial_state: bool,

    /// Reload the capability table when it changes on disk
    #[serde(default = "default_true")]
    pub watch_capabilities: bool,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capabilities_file: None,
            suppress_initial_state: false,
            watch_capabilities: true,
            config_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            capabilities = %config.capabilities_path().display(),
            suppress_initial_state = config.suppress_initial_state,
            watch_capabilities = config.watch_capabilities,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.capabilities_file {
            Some(path) if path.as_os_str().is_empty() => Err(ConfigError::ValidationError(
                "capabilities_file must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Capability table location
    ///
    /// Configured path, else the default config directory, else the
    /// working directory.
    pub fn capabilities_path(&self) -> PathBuf {
        if let Some(path) = &self.capabilities_file {
            return path.clone();
        }
        Self::default_config_dir()
            .map(|dir| dir.join(CAPABILITIES_FILE))
            .unwrap_or_else(|| PathBuf::from(CAPABILITIES_FILE))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.capabilities_file.is_none());
        assert!(!config.suppress_initial_state);
        assert!(config.watch_capabilities);
    }

    #[test]
    fn test_config_json_parsing() {
        let json = r#"{
            "capabilities_file": "/etc/headsetd/DeviceCapabilities.csv",
            "suppress_initial_state": true
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.capabilities_path(),
            PathBuf::from("/etc/headsetd/DeviceCapabilities.csv")
        );
        assert!(config.suppress_initial_state);
        // Defaults should fill in missing fields
        assert!(config.watch_capabilities);
    }

    #[test]
    fn test_config_json_minimal() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.watch_capabilities);
        assert!(config.capabilities_path().ends_with(CAPABILITIES_FILE));
    }

    #[test]
    fn test_empty_capabilities_path_rejected() {
        let config = Config {
            capabilities_file: Some(PathBuf::new()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_missing_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = Config::load(&path).unwrap();
        assert!(config.watch_capabilities);
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_malformed_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string_pretty(&Config::default()).unwrap();
        assert!(json.contains("watch_capabilities"));
        assert!(!json.contains("config_path"));
    }
}
