//! Portfolio risk metrics calculation.
//!
//! Provides volatility, VaR (parametric, historical, Monte Carlo), Expected
//! Shortfall, Sharpe ratio, max drawdown, beta, skewness and kurtosis.
//!
//! Every metric is total: degenerate input (too few points, zero variance)
//! yields the documented default wrapped in an [`Estimate`] that records why.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::config::{RiskConfig, TRADING_DAYS};
use crate::types::{Estimate, Fallback, LiquidityRisk, ReturnSeries, RiskReport, VarEstimate};

/// Sample standard deviations at or below this are treated as zero.
const MIN_STD: f64 = 1e-12;

/// Average volume above which a position is considered liquid.
const HIGH_LIQUIDITY_VOLUME: f64 = 10_000_000.0;
/// Average volume above which a position is considered moderately liquid.
const MEDIUM_LIQUIDITY_VOLUME: f64 = 1_000_000.0;

/// Compute every return-based metric for a portfolio.
///
/// `benchmark` is the market proxy's own return series; pass an empty series
/// when none is available and beta falls back to 1.0. Stress results are left
/// empty for the caller to fill in.
pub fn calculate_risk_metrics(
    returns: &ReturnSeries,
    benchmark: &ReturnSeries,
    config: &RiskConfig,
) -> RiskReport {
    let values = returns.values();
    let notional = config.reference_notional;
    let horizon = config.horizon_scale();
    let mut rng = match config.monte_carlo_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let value_at_risk = config
        .var_confidence_levels
        .iter()
        .map(|&confidence| VarEstimate {
            confidence,
            parametric: parametric_var(&values, confidence, notional).scaled(horizon),
            historical: historical_var(&values, confidence, notional).scaled(horizon),
            monte_carlo: monte_carlo_var(
                &values,
                confidence,
                notional,
                config.monte_carlo_simulations,
                &mut rng,
            )
            .scaled(horizon),
            expected_shortfall: expected_shortfall(&values, confidence, notional).scaled(horizon),
        })
        .collect();

    RiskReport {
        observations: values.len(),
        volatility: volatility(&values),
        value_at_risk,
        sharpe_ratio: sharpe_ratio(&values, config.daily_risk_free_rate()),
        max_drawdown: max_drawdown(&values),
        beta: beta(returns, benchmark, config.min_observations),
        skewness: skewness(&values),
        kurtosis: kurtosis(&values),
        stress_test_results: BTreeMap::new(),
    }
}

/// Annualized volatility (sample standard deviation × √252).
pub fn volatility(returns: &[f64]) -> Estimate {
    match sample_std(returns) {
        None => Estimate::fallback(0.0, Fallback::EmptySeries),
        Some(std) if std <= MIN_STD => Estimate::fallback(0.0, Fallback::ZeroVariance),
        Some(std) => Estimate::finite_or(std * TRADING_DAYS.sqrt(), 0.0),
    }
}

/// Parametric (variance-covariance) VaR in currency terms.
///
/// The return quantile is `mean − z(1−c)·std`; its magnitude is scaled by
/// `notional` and reported as a loss (non-positive).
pub fn parametric_var(returns: &[f64], confidence: f64, notional: f64) -> Estimate {
    match parametric_quantile(returns, confidence) {
        Some(q) => Estimate::finite_or(-q.abs() * notional, 0.0),
        None => Estimate::fallback(0.0, Fallback::EmptySeries),
    }
}

/// Historical VaR: the `(1−c)·100`-th percentile of the observed returns.
pub fn historical_var(returns: &[f64], confidence: f64, notional: f64) -> Estimate {
    if returns.is_empty() {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    }
    if has_non_finite(returns) {
        debug!("non-finite return in historical window");
        return Estimate::fallback(0.0, Fallback::NonFinite);
    }

    let mut sorted = returns.to_vec();
    sort_ascending(&mut sorted);
    let q = percentile(&sorted, (1.0 - confidence) * 100.0);
    Estimate::finite_or(-q.abs() * notional, 0.0)
}

/// Monte Carlo VaR from `simulations` draws of a normal distribution fitted
/// to the series' mean and standard deviation.
pub fn monte_carlo_var<R: Rng + ?Sized>(
    returns: &[f64],
    confidence: f64,
    notional: f64,
    simulations: usize,
    rng: &mut R,
) -> Estimate {
    let (Some(mean), Some(std)) = (mean(returns), sample_std(returns)) else {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    };
    if !mean.is_finite() || !std.is_finite() {
        return Estimate::fallback(0.0, Fallback::NonFinite);
    }
    if simulations == 0 {
        return Estimate::fallback(0.0, Fallback::InsufficientObservations);
    }
    let Ok(normal) = Normal::new(mean, std) else {
        debug!(mean, std, "cannot fit normal distribution");
        return Estimate::fallback(0.0, Fallback::NonFinite);
    };

    let mut simulated: Vec<f64> = (0..simulations).map(|_| normal.sample(rng)).collect();
    sort_ascending(&mut simulated);
    let q = percentile(&simulated, (1.0 - confidence) * 100.0);
    Estimate::finite_or(-q.abs() * notional, 0.0)
}

/// Expected Shortfall: mean of the returns at or below the parametric VaR
/// threshold, in currency terms. Zero when the tail is empty.
pub fn expected_shortfall(returns: &[f64], confidence: f64, notional: f64) -> Estimate {
    let Some(q) = parametric_quantile(returns, confidence) else {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    };
    let threshold = -q.abs();

    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
    match mean(&tail) {
        Some(tail_mean) => Estimate::finite_or(-tail_mean.abs() * notional, 0.0),
        None => {
            debug!(threshold, "no returns in the loss tail");
            Estimate::fallback(0.0, Fallback::NoTailObservations)
        }
    }
}

/// Annualized Sharpe ratio of daily returns over `daily_risk_free_rate`.
pub fn sharpe_ratio(returns: &[f64], daily_risk_free_rate: f64) -> Estimate {
    let (Some(mean), Some(std)) = (mean(returns), sample_std(returns)) else {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    };
    if std <= MIN_STD {
        return Estimate::fallback(0.0, Fallback::ZeroVariance);
    }

    Estimate::finite_or((mean - daily_risk_free_rate) / std * TRADING_DAYS.sqrt(), 0.0)
}

/// Maximum drawdown of the cumulative wealth curve, as a non-positive decimal
/// (e.g., -0.15 for a 15% peak-to-trough decline).
pub fn max_drawdown(returns: &[f64]) -> Estimate {
    if returns.is_empty() {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    }

    let mut wealth = 1.0;
    let mut running_max = f64::NEG_INFINITY;
    let mut max_drawdown: f64 = 0.0;

    for r in returns {
        wealth *= 1.0 + r;
        running_max = running_max.max(wealth);
        let drawdown = (wealth - running_max) / running_max;
        if drawdown < max_drawdown {
            max_drawdown = drawdown;
        }
    }

    Estimate::finite_or(max_drawdown, 0.0)
}

/// Beta of the portfolio against a benchmark, over their common dates.
///
/// Falls back to 1.0 with fewer than `min_observations` common dates or a
/// flat benchmark.
pub fn beta(portfolio: &ReturnSeries, benchmark: &ReturnSeries, min_observations: usize) -> Estimate {
    let (p, b) = portfolio.aligned_with(benchmark);
    if p.len() < min_observations.max(2) {
        debug!(
            common = p.len(),
            required = min_observations,
            "too few common observations for beta"
        );
        return Estimate::fallback(1.0, Fallback::InsufficientObservations);
    }

    let (Some(cov), Some(var)) = (sample_covariance(&p, &b), sample_variance(&b)) else {
        return Estimate::fallback(1.0, Fallback::EmptySeries);
    };
    if var.sqrt() <= MIN_STD {
        return Estimate::fallback(1.0, Fallback::ZeroVariance);
    }

    Estimate::finite_or(cov / var, 1.0)
}

/// Bias-corrected sample skewness.
pub fn skewness(returns: &[f64]) -> Estimate {
    let n = returns.len();
    if n < 3 {
        return Estimate::fallback(0.0, Fallback::InsufficientObservations);
    }
    let Some(m) = mean(returns) else {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    };

    let nf = n as f64;
    let m2 = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / nf;
    let m3 = returns.iter().map(|r| (r - m).powi(3)).sum::<f64>() / nf;
    if m2.sqrt() <= MIN_STD {
        return Estimate::fallback(0.0, Fallback::ZeroVariance);
    }

    let g1 = m3 / m2.powf(1.5);
    Estimate::finite_or(g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0), 0.0)
}

/// Bias-corrected sample excess kurtosis (0 for a normal distribution).
pub fn kurtosis(returns: &[f64]) -> Estimate {
    let n = returns.len();
    if n < 4 {
        return Estimate::fallback(0.0, Fallback::InsufficientObservations);
    }
    let Some(m) = mean(returns) else {
        return Estimate::fallback(0.0, Fallback::EmptySeries);
    };

    let nf = n as f64;
    let s2 = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>();
    let s4 = returns.iter().map(|r| (r - m).powi(4)).sum::<f64>();
    if (s2 / nf).sqrt() <= MIN_STD {
        return Estimate::fallback(0.0, Fallback::ZeroVariance);
    }

    let numerator = nf * (nf + 1.0) * (nf - 1.0) * s4;
    let denominator = (nf - 2.0) * (nf - 3.0) * s2 * s2;
    let adjustment = 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));
    Estimate::finite_or(numerator / denominator - adjustment, 0.0)
}

/// Liquidity tier from average traded volume.
pub fn liquidity_risk(average_volume: Option<f64>) -> LiquidityRisk {
    match average_volume {
        Some(v) if !v.is_finite() => LiquidityRisk::Unknown,
        Some(v) if v > HIGH_LIQUIDITY_VOLUME => LiquidityRisk::Low,
        Some(v) if v > MEDIUM_LIQUIDITY_VOLUME => LiquidityRisk::Medium,
        Some(_) => LiquidityRisk::High,
        None => LiquidityRisk::Unknown,
    }
}

/// Linear-interpolated percentile (0..=100) of an ascending slice.
///
/// Returns NaN for an empty slice.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Inverse cumulative distribution function for standard normal distribution.
///
/// Uses Acklam's algorithm for high accuracy across the full range.
/// Source: https://web.archive.org/web/20151110174102/http://home.online.no/~pjacklam/notes/invnorm/
pub fn norm_ppf(p: f64) -> f64 {
    // Coefficients in rational approximations
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];

    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];

    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];

    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// `mean − z(1−c)·std` in return units, `None` below two observations.
fn parametric_quantile(returns: &[f64], confidence: f64) -> Option<f64> {
    let mean = mean(returns)?;
    let std = sample_std(returns)?;
    let z = norm_ppf(1.0 - confidence);
    Some(mean - z * std)
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub(crate) fn sample_variance(values: &[f64]) -> Option<f64> {
    sample_covariance(values, values)
}

pub(crate) fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Sample covariance (n − 1 denominator) of two equally long slices.
pub(crate) fn sample_covariance(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = mean(a)?;
    let mean_b = mean(b)?;

    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum();
    Some(sum / (n - 1) as f64)
}

fn sort_ascending(values: &mut [f64]) {
    values.sort_by(f64::total_cmp);
}

fn has_non_finite(values: &[f64]) -> bool {
    values.iter().any(|v| !v.is_finite())
}
