//! Coordinator configuration.
//!
//! Loaded from JSON or built in code; every field has a default.

use crate::core::{Error, Result};
use crate::federated::strategy::StrategyConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for a federated run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Rounds to run
    pub num_rounds: u32,
    /// Per-client invocation timeout in milliseconds (none = wait forever)
    pub client_timeout_ms: Option<u64>,
    /// Seed for client sampling
    pub seed: u64,
    /// Selection and local-training settings
    pub strategy: StrategyConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            num_rounds: 15,
            client_timeout_ms: None,
            seed: 42,
            strategy: StrategyConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse from a JSON string and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid coordinator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Set the number of rounds.
    pub fn with_rounds(mut self, num_rounds: u32) -> Self {
        self.num_rounds = num_rounds;
        self
    }

    /// Set the per-client timeout.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set strategy settings.
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Per-client timeout as a duration.
    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout_ms.map(Duration::from_millis)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.num_rounds < 1 {
            return Err(Error::Configuration("num_rounds must be at least 1".to_string()));
        }
        if self.client_timeout_ms == Some(0) {
            return Err(Error::Configuration(
                "client_timeout_ms must be positive".to_string(),
            ));
        }
        self.strategy.validate()
    }
}
