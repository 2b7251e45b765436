//! Engine configuration.
//!
//! A [`RiskConfig`] is built once, validated, and then handed to
//! [`RiskEngine`](crate::RiskEngine), which only ever reads it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Trading periods per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Symbols that receive the primary and secondary stress shocks.
///
/// Every other symbol is treated as the residual asset class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetClassMap {
    pub primary: String,
    pub secondary: String,
}

impl Default for AssetClassMap {
    fn default() -> Self {
        Self {
            primary: "BTC".to_string(),
            secondary: "ETH".to_string(),
        }
    }
}

/// Limits for the weight optimizer's iterative solver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Total projected-gradient steps across all penalty rounds
    pub max_iterations: usize,
    /// Convergence threshold on the largest weight change per step
    pub tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200_000,
            tolerance: 1e-12,
        }
    }
}

/// Configuration for risk, stress and optimization calculations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Confidence levels for VaR and Expected Shortfall
    pub var_confidence_levels: Vec<f64>,
    /// Holding period in days; VaR figures scale by its square root
    pub var_time_horizon: u32,
    /// Annual risk-free rate (e.g., 0.02 for 2%)
    pub risk_free_rate: f64,
    /// Number of Monte Carlo draws
    pub monte_carlo_simulations: usize,
    /// Seed for reproducible Monte Carlo runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monte_carlo_seed: Option<u64>,
    /// Fixed dollar scale for VaR and Expected Shortfall
    pub reference_notional: f64,
    /// Market proxy used for beta
    pub benchmark_symbol: String,
    pub asset_classes: AssetClassMap,
    /// Minimum overlapping observations for beta and optimization
    pub min_observations: usize,
    pub optimizer: OptimizerSettings,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            var_confidence_levels: vec![0.95, 0.99],
            var_time_horizon: 1,
            risk_free_rate: 0.02,
            monte_carlo_simulations: 10_000,
            monte_carlo_seed: None,
            reference_notional: 10_000_000.0,
            benchmark_symbol: "BTC".to_string(),
            asset_classes: AssetClassMap::default(),
            min_observations: 30,
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl RiskConfig {
    /// Load configuration from the default path.
    ///
    /// Default path: `~/.coinrisk/config.json`
    /// Can be overridden with `COINRISK_CONFIG_FILE` environment variable.
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_path())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var("COINRISK_CONFIG_FILE") {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".coinrisk/config.json"))
            .unwrap_or_else(|| PathBuf::from("coinrisk.json"))
    }

    /// Load and validate configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Uppercase symbols and order confidence levels ascending.
    pub fn normalize(&mut self) {
        self.benchmark_symbol = self.benchmark_symbol.to_uppercase();
        self.asset_classes.primary = self.asset_classes.primary.to_uppercase();
        self.asset_classes.secondary = self.asset_classes.secondary.to_uppercase();
        self.var_confidence_levels
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.var_confidence_levels.dedup();
    }

    /// Check that every field is usable by the engine.
    pub fn validate(&self) -> Result<()> {
        if let Some(c) = self
            .var_confidence_levels
            .iter()
            .find(|c| !(**c > 0.0 && **c < 1.0))
        {
            return Err(Error::InvalidConfig(format!(
                "confidence level {c} must lie strictly between 0 and 1"
            )));
        }
        if self.var_time_horizon == 0 {
            return Err(Error::InvalidConfig(
                "var_time_horizon must be at least one day".to_string(),
            ));
        }
        if !(self.reference_notional.is_finite() && self.reference_notional > 0.0) {
            return Err(Error::InvalidConfig(
                "reference_notional must be positive".to_string(),
            ));
        }
        if self.monte_carlo_simulations == 0 {
            return Err(Error::InvalidConfig(
                "monte_carlo_simulations must be positive".to_string(),
            ));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(Error::InvalidConfig(
                "risk_free_rate must be finite".to_string(),
            ));
        }
        if self.min_observations < 2 {
            return Err(Error::InvalidConfig(
                "min_observations must be at least 2".to_string(),
            ));
        }
        if self.optimizer.max_iterations == 0 || !(self.optimizer.tolerance > 0.0) {
            return Err(Error::InvalidConfig(
                "optimizer needs a positive iteration limit and tolerance".to_string(),
            ));
        }
        Ok(())
    }

    /// Daily risk-free rate.
    pub fn daily_risk_free_rate(&self) -> f64 {
        self.risk_free_rate / TRADING_DAYS
    }

    /// Factor applied to one-day VaR figures.
    pub fn horizon_scale(&self) -> f64 {
        f64::from(self.var_time_horizon).sqrt()
    }
}
