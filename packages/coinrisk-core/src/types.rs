//! Core data types for the risk engine.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A holding in the portfolio snapshot handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// Asset identifier (uppercase, e.g. "BTC")
    pub symbol: String,
    /// Signed quantity held
    pub quantity: f64,
    /// Average entry price
    pub avg_price: f64,
    /// Latest known price
    pub current_price: f64,
    /// Market value as reported by the caller.
    ///
    /// The engine never reads this; it uses [`Position::current_value`].
    #[serde(default)]
    pub market_value: f64,
    /// Fraction of total portfolio market value
    #[serde(default)]
    pub weight: f64,
}

impl Position {
    /// Create a position with a recomputed market value and zero weight.
    pub fn new(symbol: &str, quantity: f64, avg_price: f64, current_price: f64) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            quantity,
            avg_price,
            current_price,
            market_value: quantity * current_price,
            weight: 0.0,
        }
    }

    /// Reprice the position, recomputing its market value.
    pub fn with_price(&self, current_price: f64) -> Self {
        Self {
            current_price,
            market_value: self.quantity * current_price,
            ..self.clone()
        }
    }

    /// Set the allocation weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Market value recomputed from quantity and current price.
    pub fn current_value(&self) -> f64 {
        self.quantity * self.current_price
    }
}

/// One row of the long-format historical price table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub symbol: String,
    pub close_price: f64,
    #[serde(default)]
    pub volume: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, symbol: &str, close_price: f64, volume: f64) -> Self {
        Self {
            date,
            symbol: symbol.to_uppercase(),
            close_price,
            volume,
        }
    }
}

/// Time-ordered series of simple returns.
///
/// Dates are strictly increasing. The series may be empty. Serialized as an
/// array of `[date, return]` pairs; deserializing goes through
/// [`ReturnSeries::from_points`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<(NaiveDate, f64)>", into = "Vec<(NaiveDate, f64)>")]
pub struct ReturnSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl ReturnSeries {
    /// Build a series from points that are already sorted by date.
    pub(crate) fn from_sorted(points: Vec<(NaiveDate, f64)>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
        Self { points }
    }

    /// Build a series from arbitrary points; they are sorted and later
    /// duplicates of a date replace earlier ones.
    pub fn from_points(points: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let by_date: BTreeMap<NaiveDate, f64> = points.into_iter().collect();
        Self {
            points: by_date.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|(d, _)| *d).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, r)| *r).collect()
    }

    /// Pair up the returns of both series on the dates they share.
    ///
    /// Returns `(self_values, other_values)` in date order.
    pub fn aligned_with(&self, other: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.points.len() && j < other.points.len() {
            let (da, ra) = self.points[i];
            let (db, rb) = other.points[j];
            match da.cmp(&db) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    left.push(ra);
                    right.push(rb);
                    i += 1;
                    j += 1;
                }
            }
        }

        (left, right)
    }
}

impl From<Vec<(NaiveDate, f64)>> for ReturnSeries {
    fn from(points: Vec<(NaiveDate, f64)>) -> Self {
        Self::from_points(points)
    }
}

impl From<ReturnSeries> for Vec<(NaiveDate, f64)> {
    fn from(series: ReturnSeries) -> Self {
        series.points
    }
}

/// Why a metric fell back to its documented default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Not enough points to compute anything
    EmptySeries,
    /// Standard deviation (or benchmark variance) is zero
    ZeroVariance,
    /// Below the minimum sample size for the metric
    InsufficientObservations,
    /// No return fell inside the loss tail
    NoTailObservations,
    /// The computation produced NaN or infinity
    NonFinite,
}

/// A scalar metric value, tagged with the fallback reason when the
/// documented default was used instead of a computed value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Estimate {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
}

impl Estimate {
    pub fn computed(value: f64) -> Self {
        Self {
            value,
            fallback: None,
        }
    }

    pub fn fallback(value: f64, reason: Fallback) -> Self {
        Self {
            value,
            fallback: Some(reason),
        }
    }

    /// Use `value` if finite, otherwise the default tagged as `NonFinite`.
    pub fn finite_or(value: f64, default: f64) -> Self {
        if value.is_finite() {
            Self::computed(value)
        } else {
            Self::fallback(default, Fallback::NonFinite)
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Scale a computed value, keeping the fallback tag.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            value: self.value * factor,
            ..self
        }
    }
}

/// VaR and Expected Shortfall at one confidence level, in currency terms.
///
/// All figures are non-positive: they express a loss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VarEstimate {
    /// Confidence level (e.g., 0.95)
    pub confidence: f64,
    pub parametric: Estimate,
    pub historical: Estimate,
    pub monte_carlo: Estimate,
    pub expected_shortfall: Estimate,
}

/// Shock percentages per asset class (e.g., -0.20 for a 20% drop).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScenarioShocks {
    pub primary: f64,
    pub secondary: f64,
    pub residual: f64,
}

/// A named deterministic price shock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressScenario {
    pub name: String,
    pub shocks: ScenarioShocks,
}

/// Outcome of applying one stress scenario to the positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressResult {
    /// Portfolio value after the shock
    pub portfolio_value: f64,
    /// Change versus the unshocked value, in percent
    pub impact_pct: f64,
    /// Change versus the unshocked value, in currency
    pub impact_dollar: f64,
    pub scenario_shocks: ScenarioShocks,
}

/// Aggregate risk report for one portfolio snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    /// Number of portfolio returns the metrics were computed from
    pub observations: usize,
    /// Annualized volatility (decimal)
    pub volatility: Estimate,
    /// One entry per configured confidence level, ascending
    pub value_at_risk: Vec<VarEstimate>,
    pub sharpe_ratio: Estimate,
    /// Maximum drawdown as a non-positive decimal
    pub max_drawdown: Estimate,
    pub beta: Estimate,
    pub skewness: Estimate,
    pub kurtosis: Estimate,
    /// Keyed by scenario name
    pub stress_test_results: BTreeMap<String, StressResult>,
}

impl RiskReport {
    /// Look up the VaR block for a confidence level.
    pub fn var_at(&self, confidence: f64) -> Option<&VarEstimate> {
        self.value_at_risk
            .iter()
            .find(|v| (v.confidence - confidence).abs() < 1e-9)
    }
}

/// Liquidity tier derived from average traded volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiquidityRisk {
    Low,
    Medium,
    High,
    Unknown,
}

/// Risk figures for a single position, computed from its own price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRisk {
    pub symbol: String,
    pub volatility: Estimate,
    pub var_95: Estimate,
    pub max_drawdown: Estimate,
    pub sharpe_ratio: Estimate,
    /// Market value as a fraction of the reference notional
    pub concentration_risk: f64,
    pub liquidity_risk: LiquidityRisk,
}

/// Why the optimizer could not produce an allocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Fewer than two assets have enough return history
    InsufficientAssets,
    /// The qualifying assets share too few dates
    InsufficientOverlap,
    /// Target return lies outside what a long-only portfolio can reach
    InfeasibleTarget,
    /// The solver hit its iteration limit
    DidNotConverge,
    /// The caller's deadline elapsed
    TimedOut,
    /// The background worker panicked
    WorkerFailed,
}

/// A successful minimum-variance allocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedAllocation {
    pub optimized_weights: BTreeMap<String, f64>,
    pub current_weights: BTreeMap<String, f64>,
    /// Annualized volatility of the optimized portfolio
    pub optimized_volatility: f64,
    /// Annualized expected return of the optimized portfolio
    pub optimized_return: f64,
    pub optimized_sharpe: f64,
    /// Optimized minus current weight, per symbol
    pub weight_changes: BTreeMap<String, f64>,
    /// Positions left out for lack of return history
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_symbols: Vec<String>,
    /// Solver iterations used
    pub iterations: usize,
}

/// Result of a weight optimization request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OptimizationResult {
    Optimized(OptimizedAllocation),
    Unavailable { reason: UnavailableReason },
}

impl OptimizationResult {
    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self::Unavailable { reason }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self, Self::Optimized(_))
    }

    pub fn allocation(&self) -> Option<&OptimizedAllocation> {
        match self {
            Self::Optimized(allocation) => Some(allocation),
            Self::Unavailable { .. } => None,
        }
    }
}

/// API response wrapper used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
