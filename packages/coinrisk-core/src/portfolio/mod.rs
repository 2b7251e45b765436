//! Portfolio analytics module.
//!
//! Provides return series construction, risk metrics, stress testing and
//! weight optimization.

mod allocation;
mod optimizer;
mod returns;
mod risk;
mod stress;

pub use allocation::{assign_weights, total_market_value, weight_sum_deviation};
pub use optimizer::{
    minimize_variance, optimize_weights, project_simplex, AssetUniverse, Solution,
};
pub use returns::{asset_returns, pct_change, portfolio_returns, portfolio_values};
pub use risk::{
    beta, calculate_risk_metrics, expected_shortfall, historical_var, kurtosis, liquidity_risk,
    max_drawdown, monte_carlo_var, norm_ppf, parametric_var, percentile, sharpe_ratio, skewness,
    volatility,
};
pub use stress::{run_stress_test, run_stress_tests, AssetClass};
