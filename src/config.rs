//! Configuration handling for uv3dp
//!
//! Configuration is read from `--config PATH` (or `UV3DP_CONFIG`), falling
//! back to `config.toml` in the user's config directory
//! (`~/.config/uv3dp/config.toml` on Linux).
//!
//! ```toml
//! [pipeline]
//! cached_layers = 64
//!
//! [log]
//! verbosity = 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DEFAULT_CACHED_LAYERS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decoded layers kept in memory after the input is read
    pub cached_layers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cached_layers: DEFAULT_CACHED_LAYERS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Same scale as repeated `-v` flags
    pub verbosity: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub log: LogConfig,
}

impl Config {
    /// Returns the default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "uv3dp", "uv3dp").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration
    ///
    /// An explicit path must exist. A missing default file yields the
    /// built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// The file [`Config::load`] reads, if any
    ///
    /// An explicit path is always used; the default file only when it exists.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        }
    }

    /// Loads configuration from a specific file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = Config::default();

        assert_eq!(config.pipeline.cached_layers, 64);
        assert_eq!(config.log.verbosity, 0);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[pipeline]
cached_layers = 8
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pipeline.cached_layers, 8);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uv3dp.toml");
        fs::write(&path, "[log]\nverbosity = 2\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.log.verbosity, 2);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn explicit_path_resolves_even_when_absent() {
        let path = PathBuf::from("/nonexistent/uv3dp.toml");

        assert_eq!(Config::resolve_path(Some(path.as_path())), Some(path));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(dir.path().join("absent.toml").as_path())).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[pipeline]\ncached_layers = \"many\"\n").unwrap();

        let err = Config::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
