//! Configuration file loading for the analyzer.
//!
//! Settings are read from `analysis.toml` in the working directory. Every field
//! has a default, so a missing file or a partial file is fine.

use crate::engine::EngineOption;
use crate::persona::OpponentPersona;
use crate::quality::QualityThresholds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uci::GoOptions;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Where the evaluation after a submitted move comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalAfterMode {
    /// Wait for the engine's first result on the new position.
    #[default]
    AwaitFresh,
    /// Classify immediately, taking the negated previous evaluation as the new one.
    NegatePrevious,
}

/// Analyzer settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Engine executable. Defaults to "stockfish" (assumes it's in PATH).
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    /// Search depth sent with every `go`.
    pub depth: u32,
    /// Optional time limit per search, sent alongside the depth.
    pub movetime_ms: Option<u64>,
    pub handshake_timeout_ms: u64,
    /// How long the engine gets to exit after `quit` before it is killed.
    pub quit_grace_ms: u64,
    /// How long `stop` waits for the worker on top of `quit_grace_ms`, since
    /// the worker spends up to the quit grace shutting the engine down. See
    /// [`shutdown_bound`](Self::shutdown_bound).
    pub join_timeout_ms: u64,
    /// How often an idle worker re-checks for shutdown.
    pub idle_wake_ms: u64,
    /// Longest a searching worker waits for one engine line before checking
    /// for a new position.
    pub poll_interval_ms: u64,
    /// How long a cancelled search may take to report its `bestmove`.
    pub stop_timeout_ms: u64,
    pub result_capacity: usize,
    pub eval_after: EvalAfterMode,
    pub thresholds: QualityThresholds,
    /// Engine options sent with `setoption` during the handshake.
    pub options: BTreeMap<String, String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("stockfish"),
            engine_args: Vec::new(),
            depth: 18,
            movetime_ms: None,
            handshake_timeout_ms: 5000,
            quit_grace_ms: 3000,
            join_timeout_ms: 2000,
            idle_wake_ms: 500,
            poll_interval_ms: 50,
            stop_timeout_ms: 2000,
            result_capacity: 64,
            eval_after: EvalAfterMode::default(),
            thresholds: QualityThresholds::default(),
            options: BTreeMap::new(),
        }
    }
}

impl AnalyzerConfig {
    /// Loads the configuration from [`Self::config_path()`], or the defaults if
    /// that file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file exists but cannot be read,
    /// or [`ConfigError::ParseError`] if the file contains invalid TOML.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::from_path(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads the configuration from a specific file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Returns the path to the configuration file.
    ///
    /// Currently returns `analysis.toml` in the current working directory.
    pub fn config_path() -> PathBuf {
        PathBuf::from("analysis.toml")
    }

    /// Configure the engine to play as `persona`: its options are added to the
    /// handshake and its move time limits every search.
    pub fn for_persona(mut self, persona: &OpponentPersona) -> Self {
        for option in persona.uci_options() {
            self.options.insert(option.name, option.value);
        }
        self.movetime_ms = Some(persona.move_time_ms);
        self
    }

    pub fn engine_options(&self) -> Vec<EngineOption> {
        self.options
            .iter()
            .map(|(name, value)| EngineOption::new(name.as_str(), value.as_str()))
            .collect()
    }

    /// The search limits sent with each `go`.
    pub fn go_options(&self) -> GoOptions {
        GoOptions {
            movetime: self.movetime_ms,
            ..GoOptions::depth(self.depth)
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Longest `LiveAnalyzer::stop` blocks: the join timeout plus the quit grace.
    pub fn shutdown_bound(&self) -> Duration {
        self.join_timeout() + self.quit_grace()
    }

    pub fn idle_wake(&self) -> Duration {
        Duration::from_millis(self.idle_wake_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
