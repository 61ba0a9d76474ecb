//! Configuration file schema.

use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use spindle_io::{
    RunnerConfig, SpawnOptions,
    config::{DEFAULT_POLL_INTERVAL, DEFAULT_READ_CHUNK_SIZE},
};
use tracing::info;

use crate::prelude::*;

/// `[runner]` section: defaults for every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// How long the event loop waits for an event before sweeping timeouts.
    pub poll_interval_ms: u64,
    /// Inactivity timeout, in seconds. No timeouts when absent.
    pub timeout_secs: Option<f64>,
    /// Fail runs whose process exits with a non-zero code.
    pub exception_on_error: bool,
    /// Largest chunk handed to a protocol in one call.
    pub read_chunk_size: usize,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            timeout_secs: None,
            exception_on_error: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// `[spawn]` section: how processes are created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnSection {
    pub cwd: Option<PathBuf>,
    pub clear_env: bool,
    pub env: BTreeMap<String, String>,
}

/// Complete configuration file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    pub runner: RunnerSection,
    pub spawn: SpawnSection,
}

impl SpindleConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file_path)?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded configuration from {}", file_path.display());
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(value: &str) -> Result<Self> {
        let config: Self = toml::from_str(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Reject values the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.runner.poll_interval_ms == 0 {
            return Err(Error::Invalid(String::from(
                "runner.poll_interval_ms must be positive",
            )));
        }
        if self.runner.read_chunk_size == 0 {
            return Err(Error::Invalid(String::from(
                "runner.read_chunk_size must be positive",
            )));
        }
        if let Some(timeout) = self.runner.timeout_secs {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(Error::Invalid(format!(
                    "runner.timeout_secs must be a positive number of seconds, got {timeout}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(self.runner.poll_interval_ms),
            timeout: self
                .runner
                .timeout_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            exception_on_error: self.runner.exception_on_error,
            read_chunk_size: self.runner.read_chunk_size,
        }
    }

    pub fn to_spawn_options(&self) -> SpawnOptions {
        let options = SpawnOptions::default().clear_env(self.spawn.clear_env);
        let options = match &self.spawn.cwd {
            Some(cwd) => options.cwd(cwd),
            None => options,
        };
        self.spawn
            .env
            .iter()
            .fold(options, |options, (key, value)| options.env(key, value))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() -> Result<()> {
        let config = SpindleConfig::from_toml("")?;
        assert_eq!(config, SpindleConfig::default());
        assert_eq!(config.to_runner_config(), RunnerConfig::default());
        assert_eq!(config.to_spawn_options(), SpawnOptions::default());
        Ok(())
    }

    #[test]
    fn deserialize() -> Result<()> {
        let content = r#"
            # Runner defaults
            [runner]
            poll_interval_ms = 50
            timeout_secs = 1.5
            exception_on_error = false
            read_chunk_size = 4096

            # Process creation
            [spawn]
            cwd = "/tmp"
            clear_env = true

            [spawn.env]
            LANG = "C"
            PATH = "/usr/bin:/bin"
        "#;
        let config = SpindleConfig::from_toml(content)?;

        let runner = config.to_runner_config();
        assert_eq!(runner.poll_interval, Duration::from_millis(50));
        assert_eq!(runner.timeout, Some(Duration::from_millis(1500)));
        assert!(!runner.exception_on_error);
        assert_eq!(runner.read_chunk_size, 4096);

        let options = config.to_spawn_options();
        assert_eq!(options.cwd, Some(PathBuf::from("/tmp")));
        assert!(options.clear_env);
        assert_eq!(
            options.env,
            vec![
                ("LANG".into(), "C".into()),
                ("PATH".into(), "/usr/bin:/bin".into())
            ]
        );
        Ok(())
    }

    #[test]
    fn rejects_unusable_values() {
        for content in [
            "[runner]\npoll_interval_ms = 0",
            "[runner]\nread_chunk_size = 0",
            "[runner]\ntimeout_secs = 0.0",
            "[runner]\ntimeout_secs = -2.0",
            "[runner]\ntimeout_secs = inf",
        ] {
            assert!(
                matches!(SpindleConfig::from_toml(content), Err(Error::Invalid(_))),
                "{content}"
            );
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            SpindleConfig::from_toml("[runner]\npoll_interval_ms = \"fast\""),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn loads_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[runner]\ntimeout_secs = 3")?;
        let config = SpindleConfig::from_file(file.path())?;
        assert_eq!(
            config.to_runner_config().timeout,
            Some(Duration::from_secs(3))
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SpindleConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(Error::IO(_))));
    }

    #[test]
    fn serializes_back() -> Result<()> {
        let mut config = SpindleConfig::default();
        config.runner.timeout_secs = Some(0.25);
        config.spawn.env.insert(String::from("KEY"), String::from("value"));
        let parsed = SpindleConfig::from_toml(&config.to_toml()?)?;
        assert_eq!(parsed, config);
        Ok(())
    }
}
