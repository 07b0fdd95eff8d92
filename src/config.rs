use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SequencerError;

/// Main configuration structure for the sequencer
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SequencerConfig {
    /// Execution lifecycle policy
    pub engine: EngineConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// How long stop() waits for the execution task before escalating to halt()
    pub stop_timeout_ms: u64,
    /// Polling interval of a paused execution loop
    pub pause_poll_interval_ms: u64,
    /// Optional deadline per step; exceeding it is a step fault
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5000,
            pause_poll_interval_ms: 100,
            step_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms.max(1))
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl SequencerConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (sequencer.toml in the working directory)
    /// 3. Environment variables (SEQUENCER_ENGINE__STOP_TIMEOUT_MS, ...)
    pub fn load() -> Result<Self, SequencerError> {
        let file = Path::new("sequencer.toml");
        Self::load_from(file.exists().then_some(file))
    }

    /// Same as [`SequencerConfig::load`] with an explicit configuration file
    pub fn load_from(path: Option<&Path>) -> Result<Self, SequencerError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("SEQUENCER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
