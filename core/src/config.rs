//! Layered engine configuration.
//!
//! Precedence, later layers win:
//! 1. Defaults (`EngineConfig::default()`)
//! 2. TOML file (any subset of fields)
//! 3. Environment overrides (`REPLAYCAST_*`)

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_ENV_PREFIX: &str = "REPLAYCAST";

/// One narrated moment per tick; long enough to read a sentence.
pub const DEFAULT_NARRATION_TICK_MS: u64 = 4_000;

/// Snapshot-only scrubbing when there is no narration.
pub const DEFAULT_SCRUB_TICK_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("I/O error loading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: &'static str,
    },

    #[error("Config validation error: {0}")]
    Validation(String),
}

/// What `ChatSession::send` does when a response is still streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatBusyPolicy {
    #[default]
    Reject,
    CancelPrevious,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub narration_url: String,
    pub chat_url: String,
    pub narration_tick_ms: u64,
    pub scrub_tick_ms: u64,
    /// Unset means a stalled stream waits forever.
    pub stream_idle_timeout_ms: Option<u64>,
    pub snapshot_excerpt_limit: usize,
    pub event_excerpt_limit: usize,
    pub auto_play: bool,
    pub chat_busy_policy: ChatBusyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            narration_url: "http://127.0.0.1:8000/api/narration/stream".to_string(),
            chat_url: "http://127.0.0.1:8000/api/chat/stream".to_string(),
            narration_tick_ms: DEFAULT_NARRATION_TICK_MS,
            scrub_tick_ms: DEFAULT_SCRUB_TICK_MS,
            stream_idle_timeout_ms: None,
            snapshot_excerpt_limit: 20,
            event_excerpt_limit: 50,
            auto_play: true,
            chat_busy_policy: ChatBusyPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn narration_tick(&self) -> Duration {
        Duration::from_millis(self.narration_tick_ms)
    }

    pub fn scrub_tick(&self) -> Duration {
        Duration::from_millis(self.scrub_tick_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.narration_tick_ms == 0 || self.scrub_tick_ms == 0 {
            return Err(ConfigLoadError::Validation(
                "tick intervals must be greater than zero".to_string(),
            ));
        }
        if self.narration_url.trim().is_empty() || self.chat_url.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "collaborator URLs must not be empty".to_string(),
            ));
        }
        if self.stream_idle_timeout_ms == Some(0) {
            return Err(ConfigLoadError::Validation(
                "stream_idle_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for layered configuration loading.
///
/// ```no_run
/// use replaycast_core::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_file("replaycast.toml")
///     .load()
///     .expect("Failed to load config");
/// ```
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    skip_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            skip_env: false,
        }
    }

    /// A missing file is not an error; defaults are used instead.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(self) -> Result<EngineConfig, ConfigLoadError> {
        let mut config = match &self.file {
            Some(path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        if !self.skip_env {
            Self::apply_env_overrides(&mut config, &self.env_prefix, |var| env::var(var).ok())?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<EngineConfig, ConfigLoadError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("config not found at {:?}, using defaults", path);
                return Ok(EngineConfig::default());
            }
            Err(source) => {
                return Err(ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(toml::from_str(&contents)?)
    }

    /// Apply `{prefix}_*` overrides read through `lookup`.
    ///
    /// Supported variables: `NARRATION_URL`, `CHAT_URL`, `NARRATION_TICK_MS`,
    /// `SCRUB_TICK_MS`, `STREAM_IDLE_TIMEOUT_MS`, `AUTO_PLAY`.
    pub fn apply_env_overrides<F>(
        config: &mut EngineConfig,
        prefix: &str,
        lookup: F,
    ) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str| {
            let var = format!("{prefix}_{suffix}");
            lookup(&var)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (var, value.trim().to_string()))
        };

        if let Some((var, value)) = read("NARRATION_URL") {
            tracing::debug!("Applying env override: {}={}", var, value);
            config.narration_url = value;
        }
        if let Some((var, value)) = read("CHAT_URL") {
            tracing::debug!("Applying env override: {}={}", var, value);
            config.chat_url = value;
        }
        if let Some((var, value)) = read("NARRATION_TICK_MS") {
            config.narration_tick_ms = parse_millis(&var, &value)?;
        }
        if let Some((var, value)) = read("SCRUB_TICK_MS") {
            config.scrub_tick_ms = parse_millis(&var, &value)?;
        }
        if let Some((var, value)) = read("STREAM_IDLE_TIMEOUT_MS") {
            config.stream_idle_timeout_ms = match value.as_str() {
                "off" | "none" => None,
                _ => Some(parse_millis(&var, &value)?),
            };
        }
        if let Some((var, value)) = read("AUTO_PLAY") {
            config.auto_play = match value.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(ConfigLoadError::InvalidEnvValue {
                        var,
                        value,
                        expected: "true/false",
                    });
                }
            };
        }
        Ok(())
    }
}

fn parse_millis(var: &str, value: &str) -> Result<u64, ConfigLoadError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigLoadError::InvalidEnvValue {
            var: var.to_string(),
            value: value.to_string(),
            expected: "milliseconds as an unsigned integer",
        })
}
