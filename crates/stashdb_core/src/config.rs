//! Database configuration.
//!
//! A [`Config`] is built in code or loaded from a YAML file:
//!
//! ```yaml
//! path: ./data          # or ":memory:"
//! sync_on_commit: true
//! retry:
//!   max_attempts: 1000
//!   backoff_base_ms: 0.05
//!   backoff_max_ms: 5
//! ```
//!
//! Every field is optional; missing fields keep their defaults.

use crate::error::{CoreError, CoreResult};
use crate::store::RetryPolicy;
use serde::Deserialize;
use stashdb_storage::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "STASHDB_CONFIG";

/// Configuration file used when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "stashdb.yaml";

/// Configuration for a [`Database`](crate::Database).
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the engine keeps its data.
    pub location: Location,

    /// Whether to sync the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Conflict retry policy.
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: Location::InMemory,
            sync_on_commit: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values (in-memory).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine location.
    #[must_use]
    pub fn location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Stores data in the directory at `path`.
    #[must_use]
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        self.location(Location::Path(path.into()))
    }

    /// Sets whether to sync the commit log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the conflict retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Loads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Parses a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on syntax errors, unknown fields, or
    /// out-of-range values.
    pub fn from_yaml(text: &str) -> CoreResult<Self> {
        let file: ConfigFile =
            serde_yaml::from_str(text).map_err(|e| CoreError::config(e.to_string()))?;
        file.into_config()
    }
}

/// Returns the configuration file path from [`CONFIG_ENV`], or the default.
#[must_use]
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    path: Option<String>,
    sync_on_commit: Option<bool>,
    retry: Option<RetryFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetryFile {
    max_attempts: Option<u32>,
    backoff_base_ms: Option<f64>,
    backoff_max_ms: Option<f64>,
}

impl ConfigFile {
    fn into_config(self) -> CoreResult<Config> {
        let mut config = Config::default();

        if let Some(path) = self.path {
            if path.is_empty() {
                return Err(CoreError::config("path must not be empty"));
            }
            config.location = Location::parse(&path);
        }
        if let Some(sync) = self.sync_on_commit {
            config.sync_on_commit = sync;
        }
        if let Some(retry) = self.retry {
            if let Some(attempts) = retry.max_attempts {
                if attempts == 0 {
                    return Err(CoreError::config("retry.max_attempts must be at least 1"));
                }
                config.retry.max_attempts = attempts;
            }
            if let Some(ms) = retry.backoff_base_ms {
                config.retry.backoff_base = millis("retry.backoff_base_ms", ms)?;
            }
            if let Some(ms) = retry.backoff_max_ms {
                config.retry.backoff_max = millis("retry.backoff_max_ms", ms)?;
            }
        }
        Ok(config)
    }
}

fn millis(field: &str, ms: f64) -> CoreResult<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0)
        .map_err(|_| CoreError::config(format!("{field} must be a non-negative number, got {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.location, Location::InMemory);
        assert!(config.sync_on_commit);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .path("/srv/stash")
            .sync_on_commit(false)
            .retry(RetryPolicy::new().max_attempts(5));

        assert_eq!(config.location, Location::Path(PathBuf::from("/srv/stash")));
        assert!(!config.sync_on_commit);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn yaml_full() {
        let config = Config::from_yaml(
            "path: ./data\nsync_on_commit: false\nretry:\n  max_attempts: 7\n  backoff_base_ms: 0.5\n  backoff_max_ms: 20\n",
        )
        .unwrap();

        assert_eq!(config.location, Location::Path(PathBuf::from("./data")));
        assert!(!config.sync_on_commit);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.backoff_base, Duration::from_micros(500));
        assert_eq!(config.retry.backoff_max, Duration::from_millis(20));
    }

    #[test]
    fn yaml_memory_location() {
        let config = Config::from_yaml("path: \":memory:\"\n").unwrap();
        assert_eq!(config.location, Location::InMemory);
    }

    #[test]
    fn yaml_partial_keeps_defaults() {
        let config = Config::from_yaml("sync_on_commit: false\n").unwrap();
        assert_eq!(config.location, Location::InMemory);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn yaml_rejects_bad_values() {
        for text in [
            "retry:\n  max_attempts: 0\n",
            "retry:\n  backoff_max_ms: -1\n",
            "path: \"\"\n",
            "unknown_field: 1\n",
            "path: [1, 2]\n",
        ] {
            let err = Config::from_yaml(text).unwrap_err();
            assert!(matches!(err, CoreError::Config { .. }), "{text}: {err}");
        }
    }

    #[test]
    fn load_from_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stashdb.yaml");
        std::fs::write(&file, "path: \":memory:\"\nsync_on_commit: false\n").unwrap();

        let config = Config::load(&file).unwrap();
        assert!(!config.sync_on_commit);

        let missing = Config::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, CoreError::Config { .. }));
    }
}
