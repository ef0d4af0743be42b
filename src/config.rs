//! drydock configuration (`drydock.toml`)
//!
//! ```toml
//! [stack]
//! name = "invidious"
//! stage = "production"
//!
//! [apply]
//! jobs = 4
//! call_timeout_secs = 300
//! prune_orphans = true
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 2000
//! backoff_factor = 2.0
//! max_delay_ms = 60000
//!
//! [state]
//! path = "~/.local/state/drydock/invidious-production.json"
//! ```
//!
//! Every section and key is optional.

use crate::error::Error;
use crate::paths;
use anyhow::{Context, Result};
use converge::{ApplyOptions, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stack: StackConfig,
    pub apply: ApplyConfig,
    pub retry: RetrySettings,
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub name: String,
    /// `production` retains resources on teardown
    pub stage: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "invidious".to_string(),
            stage: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub jobs: usize,
    pub call_timeout_secs: u64,
    pub prune_orphans: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            call_timeout_secs: 300,
            prune_orphans: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State file; defaults to `<state dir>/<stack>-<stage>.json`
    pub path: Option<String>,
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.stack.name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "stack.name",
                message: "must not be empty".to_string(),
            });
        }
        if self.stack.stage.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "stack.stage",
                message: "must not be empty".to_string(),
            });
        }
        if self.apply.jobs == 0 {
            return Err(Error::InvalidConfig {
                field: "apply.jobs",
                message: "at least one worker is required".to_string(),
            });
        }
        if self.apply.call_timeout_secs == 0 {
            return Err(Error::InvalidConfig {
                field: "apply.call_timeout_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                field: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(Error::InvalidConfig {
                field: "retry.backoff_factor",
                message: format!("{} is not a factor >= 1.0", self.retry.backoff_factor),
            });
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            backoff_factor: self.retry.backoff_factor,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// Scheduler options for a run
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            jobs: self.apply.jobs,
            call_timeout: Duration::from_secs(self.apply.call_timeout_secs),
            retry: self.retry_config(),
            prune_orphans: self.apply.prune_orphans,
            ..Default::default()
        }
    }

    /// Resolved state file path
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state.path {
            Some(path) => Ok(paths::expand(path)),
            None => Ok(paths::state_dir()?.join(format!(
                "{}-{}.json",
                self.stack.name, self.stack.stage
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.stack.name, "invidious");

        let options = config.apply_options();
        assert_eq!(options.jobs, 4);
        assert_eq!(options.call_timeout, Duration::from_secs(300));
        assert_eq!(options.retry, RetryConfig::default());
        assert!(options.prune_orphans);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [stack]
            stage = "production"

            [apply]
            jobs = 8
            prune_orphans = false

            [retry]
            base_delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.stack.name, "invidious");
        assert_eq!(config.stack.stage, "production");
        let options = config.apply_options();
        assert_eq!(options.jobs, 8);
        assert!(!options.prune_orphans);
        assert_eq!(options.retry.base_delay, Duration::from_millis(250));
        assert_eq!(options.retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml("[apply]\njobs = 0").unwrap_err();
        assert!(err.to_string().contains("apply.jobs"));

        let err = Config::from_toml("[retry]\nbackoff_factor = 0.5").unwrap_err();
        assert!(err.to_string().contains("retry.backoff_factor"));

        assert!(Config::from_toml("[apply]\njobs = \"many\"").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("drydock.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drydock.toml");
        fs::write(&path, "[stack]\nname = \"media\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.stack.name, "media");
    }

    #[test]
    fn test_state_path() {
        let mut config = Config::default();
        config.state.path = Some("/var/lib/drydock/state.json".to_string());
        assert_eq!(
            config.state_path().unwrap(),
            PathBuf::from("/var/lib/drydock/state.json")
        );

        config.state.path = None;
        assert!(
            config
                .state_path()
                .unwrap()
                .ends_with("invidious-dev.json")
        );
    }
}
