//! Configuration system for feedstore.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - built into the binary
//! 2. **User config file** - `~/.config/feedstore/config.toml`
//! 3. **Environment variables** - `FEEDSTORE_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/feedstore/feedstore.db"
//!
//! [merge]
//! domain = "example.social"
//! viewer = "109348"
//! batch_size = 900
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure for feedstore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    /// Defaults for `merge` and the read commands.
    pub merge: MergeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `FEEDSTORE_DB`
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Default server domain for ids.
    /// Environment variable: `FEEDSTORE_DOMAIN`
    pub domain: Option<String>,

    /// Default viewer for home timeline pages.
    /// Environment variable: `FEEDSTORE_VIEWER`
    pub viewer: Option<String>,

    /// Ids bound per bulk preload query.
    /// Environment variable: `FEEDSTORE_BATCH_SIZE`
    pub batch_size: usize,
}

/// Output formatting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty.
    pub format: String,

    /// Enable colored output.
    pub colors: bool,

    /// Suppress non-essential output.
    pub quiet: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            domain: None,
            viewer: None,
            batch_size: crate::storage::SQLITE_BATCH_SIZE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. User config file (~/.config/feedstore/config.toml)
    /// 3. Compiled defaults
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());

        debug!("Configuration loaded: {:?}", config);
        config
    }

    /// Load configuration from a specific file.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| FeedError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&content).map_err(|e| FeedError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Loaded config from: {}", path.display());
        Ok(Some(config))
    }

    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{e}");
                None
            }
        }
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("feedstore").join("config.toml"))
    }

    /// Apply environment overrides, reading variables through `var`.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = var("FEEDSTORE_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        if let Some(domain) = var("FEEDSTORE_DOMAIN") {
            self.merge.domain = Some(domain);
        }
        if let Some(viewer) = var("FEEDSTORE_VIEWER") {
            self.merge.viewer = Some(viewer);
        }
        if let Some(batch) = var("FEEDSTORE_BATCH_SIZE") {
            match batch.parse() {
                Ok(n) => self.merge.batch_size = n,
                Err(_) => warn!("Ignoring FEEDSTORE_BATCH_SIZE={batch}: not a number"),
            }
        }

        if let Some(format) = var("FEEDSTORE_FORMAT") {
            self.output.format = format;
        }
        if var("FEEDSTORE_NO_COLOR").is_some() || var("NO_COLOR").is_some() {
            self.output.colors = false;
        }
        if var("FEEDSTORE_QUIET").is_some() {
            self.output.quiet = true;
        }
    }

    /// Merge another config into this one (other takes precedence).
    fn merge(&mut self, other: Self) {
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }

        if other.merge.domain.is_some() {
            self.merge.domain = other.merge.domain;
        }
        if other.merge.viewer.is_some() {
            self.merge.viewer = other.merge.viewer;
        }
        self.merge.batch_size = other.merge.batch_size;

        self.output = other.output;
    }

    /// Get the database path, using defaults if not configured.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Save the current configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::user_config_path().ok_or_else(|| FeedError::Config {
            path: PathBuf::from("config.toml"),
            reason: "Could not determine config directory".to_string(),
        })?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FeedError::path_error("create", parent, e))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| FeedError::Config {
            path: config_path.clone(),
            reason: e.to_string(),
        })?;

        std::fs::write(&config_path, content)
            .map_err(|e| FeedError::path_error("write", &config_path, e))?;
        info!("Saved config to: {}", config_path.display());
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.merge.batch_size, 900);
        assert!(config.merge.domain.is_none());
        assert!(config.output.colors);
        assert_eq!(config.output.format, "text");
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.merge.domain = Some("example.social".to_string());
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[merge]\nviewer = \"42\"\n").unwrap();
        assert_eq!(parsed.merge.viewer.as_deref(), Some("42"));
        assert_eq!(parsed.merge.batch_size, 900);
        assert!(parsed.output.colors);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.merge.domain = Some("a.social".to_string());
        let mut other = Config::default();
        other.merge.batch_size = 50;
        other.paths.db = Some(PathBuf::from("/custom/path"));

        base.merge(other);

        assert_eq!(base.merge.batch_size, 50);
        assert_eq!(base.merge.domain.as_deref(), Some("a.social"));
        assert_eq!(base.paths.db, Some(PathBuf::from("/custom/path")));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("FEEDSTORE_DB", "/tmp/x.db"),
            ("FEEDSTORE_DOMAIN", "example.social"),
            ("FEEDSTORE_BATCH_SIZE", "64"),
            ("NO_COLOR", "1"),
        ]));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(config.merge.domain.as_deref(), Some("example.social"));
        assert_eq!(config.merge.batch_size, 64);
        assert!(!config.output.colors);
        assert!(!config.output.quiet);
    }

    #[test]
    fn test_bad_batch_size_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[("FEEDSTORE_BATCH_SIZE", "lots")]));
        assert_eq!(config.merge.batch_size, 900);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(Config::load_from_file(&path).unwrap().is_none());

        std::fs::write(&path, "[output]\nformat = \"json\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap().unwrap();
        assert_eq!(config.output.format, "json");

        std::fs::write(&path, "[output\n").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(FeedError::Config { .. })
        ));
    }
}
