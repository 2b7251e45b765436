//! CoinRisk Core - Portfolio risk and optimization engine for crypto portfolios.
//!
//! This crate turns a snapshot of positions plus historical prices into:
//!
//! - **Risk metrics**: volatility, parametric/historical/Monte Carlo VaR,
//!   Expected Shortfall, Sharpe ratio, max drawdown, beta, skewness, kurtosis
//! - **Stress tests**: deterministic shock scenarios on current prices
//! - **Weight optimization**: long-only minimum-variance allocation,
//!   optionally at a target return
//!
//! Engine computations never fail. Insufficient data resolves to documented
//! defaults tagged on each [`Estimate`], and the optimizer reports
//! [`OptimizationResult::Unavailable`] instead of an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use coinrisk_core::{PriceTable, RiskConfig, RiskEngine};
//! use coinrisk_core::snapshot::load_positions;
//! use std::path::Path;
//!
//! let engine = RiskEngine::new(RiskConfig::load()?);
//! let positions = load_positions(Path::new("positions.json"))?;
//! let prices = PriceTable::load_json(Path::new("prices.json"))?;
//!
//! let report = engine.calculate_portfolio_risk(&positions, &prices);
//! println!("Annualized volatility: {:.2}%", report.volatility.value * 100.0);
//! # Ok::<(), coinrisk_core::Error>(())
//! ```

pub mod config;
pub mod engine;
pub mod portfolio;
pub mod snapshot;
pub mod types;

// Re-export commonly used types
pub use config::{AssetClassMap, OptimizerSettings, RiskConfig};
pub use engine::RiskEngine;
pub use snapshot::PriceTable;
pub use types::{
    ApiResponse, Estimate, Fallback, LiquidityRisk, OptimizationResult, OptimizedAllocation,
    Position, PositionRisk, PricePoint, ReturnSeries, RiskReport, ScenarioShocks, StressResult,
    StressScenario, UnavailableReason, VarEstimate,
};

// Re-export main functionality
pub use portfolio::{
    assign_weights, calculate_risk_metrics, optimize_weights, portfolio_returns, run_stress_tests,
    AssetClass,
};

/// Error types for loading engine inputs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for coinrisk-core operations.
pub type Result<T> = std::result::Result<T, Error>;
