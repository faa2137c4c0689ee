//! Configuration management for repowatch
//!
//! Covers the poll loop timing and the repository layout anchors used
//! by classification. Values come from defaults, an optional TOML file,
//! and `REPOWATCH_*` environment overrides, in that order.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};

/// Global configuration for repowatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoWatchConfig {
    /// Poll loop configuration
    pub watcher: WatcherConfig,
    /// Repository layout configuration
    pub paths: PathsConfig,
}

/// Configuration for the background poll loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Interval between background polls in milliseconds
    pub poll_interval_ms: u64,
    /// How often a coalesced caller re-checks cancellation while waiting
    pub wait_slice_ms: u64,
}

/// Where the git metadata lives and which working-tree folders never count as changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Name of the git metadata directory, relative to the repository root
    pub git_dir: String,
    /// Build/cache directories, relative to the repository root
    pub ignored_dirs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            wait_slice_ms: 50,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            git_dir: ".git".to_string(),
            ignored_dirs: vec!["target".to_string(), ".cache".to_string()],
        }
    }
}

impl WatcherConfig {
    /// Get poll interval duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the cancellation re-check slice for coalesced waiters
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

impl RepoWatchConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WatchError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WatchError::Config {
            reason: e.to_string(),
        })
    }

    /// Load from `file` when given, otherwise defaults, then apply environment overrides
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("REPOWATCH_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.poll_interval_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("REPOWATCH_WAIT_SLICE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.wait_slice_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("REPOWATCH_GIT_DIR") {
            if !val.is_empty() {
                self.paths.git_dir = val;
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(WatchError::Config {
                reason: reason.to_string(),
            })
        };

        if self.watcher.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than 0");
        }

        if self.watcher.wait_slice_ms == 0 {
            return invalid("wait_slice_ms must be greater than 0");
        }

        if self.paths.git_dir.trim().is_empty() {
            return invalid("git_dir must not be empty");
        }

        if self
            .paths
            .ignored_dirs
            .iter()
            .any(|dir| PathBuf::from(dir).is_absolute())
        {
            return invalid("ignored_dirs must be relative to the repository root");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RepoWatchConfig::default();

        assert_eq!(config.watcher.poll_interval_ms, 1000);
        assert_eq!(config.paths.git_dir, ".git");
        assert_eq!(config.paths.ignored_dirs.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RepoWatchConfig::default();

        config.watcher.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.watcher.poll_interval_ms = 500;
        config.paths.git_dir = "  ".to_string();
        assert!(config.validate().is_err());

        config.paths.git_dir = ".git".to_string();
        config.paths.ignored_dirs = vec!["/tmp/build".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RepoWatchConfig::from_toml_str(
            r#"
            [watcher]
            poll_interval_ms = 250

            [paths]
            ignored_dirs = ["obj"]
            "#,
        )
        .unwrap();

        assert_eq!(config.watcher.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.watcher.wait_slice_ms, 50);
        assert_eq!(config.paths.git_dir, ".git");
        assert_eq!(config.paths.ignored_dirs, vec!["obj".to_string()]);
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = RepoWatchConfig::from_toml_str("[watcher\npoll = ").unwrap_err();
        assert!(matches!(err, WatchError::Config { .. }));
    }

    #[test]
    fn test_env_config_loading() {
        std::env::set_var("REPOWATCH_POLL_INTERVAL_MS", "2000");
        std::env::set_var("REPOWATCH_GIT_DIR", ".repo-git");

        let config = RepoWatchConfig::from_env();

        assert_eq!(config.watcher.poll_interval_ms, 2000);
        assert_eq!(config.paths.git_dir, ".repo-git");

        // Cleanup
        std::env::remove_var("REPOWATCH_POLL_INTERVAL_MS");
        std::env::remove_var("REPOWATCH_GIT_DIR");
    }
}
