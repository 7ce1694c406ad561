//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files, with
//! environment variable overrides for machine-specific paths.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::backtest::{FailurePolicy, SessionKey};
use crate::error::ConfigError;
use crate::grid::ParameterGrid;
use crate::strategies::short_straddle::{StrategyConfig, StrategyParams};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub strategy: StrategyParams,
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Grid search parameters for optimization (optional)
    /// Each key is a strategy param name, value is array of values to test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<HashMap<String, Vec<serde_json::Value>>>,
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Per-session load timeout (default: 30)
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

/// A trading date, optionally with its own expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub date: NaiveDate,
    /// Falls back to `strategy.expiry`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_results_dir() -> String {
    "backtest_results".to_string()
}

fn default_load_timeout_secs() -> u64 {
    30
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            load_timeout_secs: default_load_timeout_secs(),
            fail_fast: false,
            schedule: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(data_dir) = std::env::var("STRADDLE_DATA_DIR") {
            config.backtest.data_dir = data_dir;
        }
        if let Ok(results_dir) = std::env::var("STRADDLE_RESULTS_DIR") {
            config.backtest.results_dir = results_dir;
        }

        Ok(config)
    }

    /// Validated strategy parameters
    pub fn strategy_config(&self) -> Result<StrategyConfig, ConfigError> {
        StrategyConfig::new(self.strategy.clone())
    }

    pub fn parameter_grid(&self) -> ParameterGrid {
        self.grid
            .clone()
            .map(ParameterGrid::from_map)
            .unwrap_or_default()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.backtest.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        }
    }

    /// Sessions to run, in configured order
    pub fn sessions(&self) -> Vec<SessionKey> {
        self.backtest
            .schedule
            .iter()
            .map(|entry| SessionKey::new(entry.date, entry.expiry.unwrap_or(self.strategy.expiry)))
            .collect()
    }

    /// Replace the schedule with `dates`, all on `expiry`
    pub fn set_dates(&mut self, dates: &[NaiveDate], expiry: Option<NaiveDate>) {
        self.backtest.schedule = dates
            .iter()
            .map(|&date| ScheduleEntry { date, expiry })
            .collect();
    }

    /// Use `expiry` for the strategy and every scheduled session
    pub fn set_expiry(&mut self, expiry: NaiveDate) {
        self.strategy.expiry = expiry;
        for entry in &mut self.backtest.schedule {
            entry.expiry = Some(expiry);
        }
    }
}
