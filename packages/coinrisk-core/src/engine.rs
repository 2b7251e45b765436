//! The risk engine: one immutable configuration, many independent reports.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::portfolio::{
    asset_returns, calculate_risk_metrics, liquidity_risk, max_drawdown, optimize_weights,
    parametric_var, portfolio_returns, run_stress_tests, sharpe_ratio, volatility,
};
use crate::snapshot::PriceTable;
use crate::types::{
    OptimizationResult, Position, PositionRisk, RiskReport, StressResult, StressScenario,
    UnavailableReason,
};

/// Confidence level for per-position VaR.
const POSITION_VAR_CONFIDENCE: f64 = 0.95;

/// Computes risk reports, stress results and optimized allocations.
///
/// The engine holds no mutable state; share it freely across threads.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
    scenarios: Vec<StressScenario>,
}

impl RiskEngine {
    /// Create an engine with the built-in stress scenario catalog.
    pub fn new(config: RiskConfig) -> Self {
        Self::with_scenarios(config, StressScenario::catalog())
    }

    /// Create an engine with a custom scenario list.
    pub fn with_scenarios(mut config: RiskConfig, scenarios: Vec<StressScenario>) -> Self {
        config.normalize();
        Self { config, scenarios }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn scenarios(&self) -> &[StressScenario] {
        &self.scenarios
    }

    /// Full risk report for a snapshot: return-based metrics plus stress results.
    ///
    /// Empty positions or price history yield the documented defaults.
    pub fn calculate_portfolio_risk(&self, positions: &[Position], prices: &PriceTable) -> RiskReport {
        let returns = portfolio_returns(positions, prices);
        if returns.is_empty() {
            debug!(
                positions = positions.len(),
                "no portfolio returns; reporting default metrics"
            );
        }
        let benchmark = asset_returns(&self.config.benchmark_symbol, prices);

        let mut report = calculate_risk_metrics(&returns, &benchmark, &self.config);
        report.stress_test_results = self.run_stress_tests(positions);
        report
    }

    /// Apply every configured scenario to the positions' current prices.
    pub fn run_stress_tests(&self, positions: &[Position]) -> BTreeMap<String, StressResult> {
        run_stress_tests(positions, &self.scenarios, &self.config.asset_classes)
    }

    /// Risk figures for one position from its own price history.
    pub fn position_risk(&self, position: &Position, prices: &PriceTable) -> PositionRisk {
        let returns = asset_returns(&position.symbol, prices).values();

        PositionRisk {
            symbol: position.symbol.clone(),
            volatility: volatility(&returns),
            var_95: parametric_var(
                &returns,
                POSITION_VAR_CONFIDENCE,
                self.config.reference_notional,
            ),
            max_drawdown: max_drawdown(&returns),
            sharpe_ratio: sharpe_ratio(&returns, self.config.daily_risk_free_rate()),
            concentration_risk: position.current_value() / self.config.reference_notional,
            liquidity_risk: liquidity_risk(prices.average_volume(&position.symbol)),
        }
    }

    /// Minimum-variance allocation, optionally at a target annual return.
    ///
    /// Runs on the calling thread; see [`RiskEngine::optimize_weights_with_timeout`]
    /// for interactive callers.
    pub fn optimize_weights(
        &self,
        positions: &[Position],
        prices: &PriceTable,
        target_return: Option<f64>,
    ) -> OptimizationResult {
        optimize_weights(positions, prices, target_return, &self.config)
    }

    /// Run the optimizer on the blocking thread pool, bounded by `timeout`.
    ///
    /// The solver cannot be cancelled: on timeout the worker keeps running
    /// until it finishes, but its result is discarded.
    pub async fn optimize_weights_with_timeout(
        self: Arc<Self>,
        positions: Vec<Position>,
        prices: Arc<PriceTable>,
        target_return: Option<f64>,
        timeout: Duration,
    ) -> OptimizationResult {
        let worker = tokio::task::spawn_blocking(move || {
            self.optimize_weights(&positions, &prices, target_return)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(error = %e, "optimizer worker failed");
                OptimizationResult::unavailable(UnavailableReason::WorkerFailed)
            }
            Err(_) => {
                warn!(?timeout, "optimizer timed out");
                OptimizationResult::unavailable(UnavailableReason::TimedOut)
            }
        }
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}
