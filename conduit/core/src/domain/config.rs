// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Pipeline Configuration Types
//
// Defines the configuration schema for a conduit pipeline runtime:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Optional custom phase catalogs per direction
// - Unwind policy, sort cache and event bus settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::fault::{ChainError, UnwindPolicy};
use crate::domain::phase::{PhaseManager, PhaseRegistry, INBOUND_PHASES, OUTBOUND_PHASES};

pub const API_VERSION: &str = "conduit.dev/v1";
pub const KIND: &str = "PipelineConfig";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid phase catalog: {0}")]
    Phases(#[from] ChainError),
}

/// Top-level Kubernetes-style pipeline configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// API version (must be "conduit.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "PipelineConfig")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: PipelineSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub phases: PhasesConfig,

    #[serde(default)]
    pub unwind: UnwindConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

/// Custom phase catalogs. `None` keeps the standard catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnwindConfig {
    /// Whether the interceptor that raised a fault gets its own fault callback
    #[serde(default = "default_true")]
    pub include_faulting_interceptor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size; slow subscribers lag past this
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_entries() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1000
}

impl Default for UnwindConfig {
    fn default() -> Self {
        Self {
            include_faulting_interceptor: default_true(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_entries: default_cache_entries(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata {
                name: "default-pipeline".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: PipelineSpec::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Discover configuration file using precedence order
    /// 1. CONDUIT_CONFIG_PATH environment variable
    /// 2. ./conduit-config.yaml (working directory)
    /// 3. ~/.conduit/config.yaml (user home)
    /// 4. /etc/conduit/config.yaml (system, Unix) or C:\ProgramData\Conduit\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONDUIT_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./conduit-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".conduit").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/conduit/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Conduit\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_flag("CONDUIT_UNWIND_INCLUDE_FAULTING") {
            tracing::info!("Environment override: CONDUIT_UNWIND_INCLUDE_FAULTING={}", value);
            self.spec.unwind.include_faulting_interceptor = value;
        }
        if let Some(value) = env_flag("CONDUIT_CACHE_ENABLED") {
            tracing::info!("Environment override: CONDUIT_CACHE_ENABLED={}", value);
            self.spec.cache.enabled = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::Invalid(format!(
                "apiVersion '{}' must be '{}'",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != KIND {
            return Err(ConfigError::Invalid(format!(
                "kind '{}' must be '{}'",
                self.kind, KIND
            )));
        }
        if self.metadata.name.is_empty() {
            return Err(ConfigError::Invalid("metadata.name cannot be empty".to_string()));
        }
        if self.spec.cache.enabled && self.spec.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "spec.cache.max_entries must be positive when the cache is enabled".to_string(),
            ));
        }
        if self.spec.events.capacity == 0 {
            return Err(ConfigError::Invalid("spec.events.capacity must be positive".to_string()));
        }
        for (direction, phases) in [
            ("inbound", &self.spec.phases.inbound),
            ("outbound", &self.spec.phases.outbound),
        ] {
            if matches!(phases, Some(list) if list.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "spec.phases.{direction} cannot be an empty list"
                )));
            }
        }
        self.phase_manager()?;
        Ok(())
    }

    /// Build the phase catalogs, falling back to the standard ones.
    pub fn phase_manager(&self) -> Result<PhaseManager, ConfigError> {
        let inbound = match &self.spec.phases.inbound {
            Some(names) => PhaseRegistry::from_names(names.iter().cloned())?,
            None => PhaseRegistry::from_names(INBOUND_PHASES.iter().copied())?,
        };
        let outbound = match &self.spec.phases.outbound {
            Some(names) => PhaseRegistry::from_names(names.iter().cloned())?,
            None => PhaseRegistry::from_names(OUTBOUND_PHASES.iter().copied())?,
        };
        Ok(PhaseManager::new(inbound, outbound))
    }

    pub fn unwind_policy(&self) -> UnwindPolicy {
        UnwindPolicy {
            include_faulting: self.spec.unwind.include_faulting_interceptor,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                name,
                value
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.api_version, API_VERSION);
        assert_eq!(config.kind, KIND);
        assert!(config.spec.unwind.include_faulting_interceptor);
        assert!(config.spec.cache.enabled);
        assert!(config.validate().is_ok());

        let manager = config.phase_manager().unwrap();
        assert_eq!(manager.inbound().len(), INBOUND_PHASES.len());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: conduit.dev/v1
kind: PipelineConfig
metadata:
  name: edge
spec:
  phases:
    inbound: [receive, decode, invoke]
  unwind:
    include_faulting_interceptor: false
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.unwind_policy().include_faulting);
        assert_eq!(config.spec.cache.max_entries, 256);
        assert_eq!(config.spec.events.capacity, 1000);

        let manager = config.phase_manager().unwrap();
        assert_eq!(manager.inbound().ordinal("decode").unwrap(), 1);
        assert_eq!(manager.outbound().len(), OUTBOUND_PHASES.len());
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();

        config.api_version = "wrong/v1".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.api_version = API_VERSION.to_string();

        config.kind = "Other".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.spec.phases.outbound = Some(vec!["send".to_string(), "send".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Phases(ChainError::DuplicatePhase(_)))
        ));
        config.spec.phases.outbound = Some(Vec::new());
        assert!(config.validate().is_err());
        config.spec.phases.outbound = None;

        config.spec.events.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit-config.yaml");

        let mut config = PipelineConfig::default();
        config.metadata.name = "roundtrip".to_string();
        config.spec.cache.max_entries = 8;
        config.to_yaml_file(&path).unwrap();

        let loaded = PipelineConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.cache.max_entries, 8);
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PipelineConfig::load_or_default(Some(dir.path().join("absent.yaml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
