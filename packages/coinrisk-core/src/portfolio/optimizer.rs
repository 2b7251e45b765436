//! Long-only minimum-variance weight optimization.
//!
//! Minimizes `sqrt(wᵗΣw)` subject to `Σw = 1`, `0 ≤ w ≤ 1` and an optional
//! target return `wᵗμ = target`. The feasible set without the return
//! constraint is the probability simplex, so the solver is projected gradient
//! descent with an exact simplex projection. The return equality is handled
//! with an augmented Lagrangian around that inner loop.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::config::{OptimizerSettings, RiskConfig, TRADING_DAYS};
use crate::portfolio::returns::asset_returns;
use crate::portfolio::risk::{mean, sample_covariance};
use crate::snapshot::PriceTable;
use crate::types::{OptimizationResult, OptimizedAllocation, Position, UnavailableReason};

/// Maximum multiplier updates for the return constraint.
const MAX_PENALTY_ROUNDS: usize = 100;
/// Accepted violation of the return constraint (annualized return units).
const RETURN_TOLERANCE: f64 = 1e-8;
/// Penalty weight relative to the covariance curvature bound.
const PENALTY_SCALE: f64 = 10.0;

/// Annualized return statistics of the assets that qualify for optimization.
#[derive(Debug, Clone)]
pub struct AssetUniverse {
    pub symbols: Vec<String>,
    /// Annualized mean returns
    pub expected_returns: DVector<f64>,
    /// Annualized sample covariance matrix
    pub covariance: DMatrix<f64>,
    /// Length of the common date window
    pub observations: usize,
    /// Position symbols without enough return history
    pub excluded: Vec<String>,
}

impl AssetUniverse {
    /// Build the universe from each position's own return series.
    ///
    /// An asset qualifies with at least `min_observations` returns; the
    /// qualifying assets must then share at least `min_observations` dates.
    pub fn build(
        positions: &[Position],
        prices: &PriceTable,
        min_observations: usize,
    ) -> Result<Self, UnavailableReason> {
        let mut symbols = Vec::new();
        let mut series: Vec<HashMap<NaiveDate, f64>> = Vec::new();
        let mut excluded = Vec::new();

        for position in positions {
            if symbols.contains(&position.symbol) {
                continue;
            }
            let returns = asset_returns(&position.symbol, prices);
            if returns.len() >= min_observations {
                symbols.push(position.symbol.clone());
                series.push(returns.points().iter().copied().collect());
            } else {
                debug!(
                    symbol = %position.symbol,
                    observations = returns.len(),
                    "excluding asset with short history"
                );
                excluded.push(position.symbol.clone());
            }
        }

        if symbols.len() < 2 {
            return Err(UnavailableReason::InsufficientAssets);
        }

        let mut common: Vec<NaiveDate> = series[0]
            .keys()
            .copied()
            .filter(|date| series[1..].iter().all(|s| s.contains_key(date)))
            .collect();
        common.sort();

        if common.len() < min_observations {
            return Err(UnavailableReason::InsufficientOverlap);
        }

        let aligned: Vec<Vec<f64>> = series
            .iter()
            .map(|s| common.iter().filter_map(|d| s.get(d).copied()).collect())
            .collect();

        let n = aligned.len();
        let expected_returns = DVector::from_iterator(
            n,
            aligned.iter().map(|r| mean(r).unwrap_or(0.0) * TRADING_DAYS),
        );
        let covariance = DMatrix::from_fn(n, n, |i, j| {
            sample_covariance(&aligned[i], &aligned[j]).unwrap_or(0.0) * TRADING_DAYS
        });

        Ok(Self {
            symbols,
            expected_returns,
            covariance,
            observations: common.len(),
            excluded,
        })
    }

    /// Annualized volatility of a weight vector.
    pub fn volatility(&self, weights: &DVector<f64>) -> f64 {
        weights.dot(&(&self.covariance * weights)).max(0.0).sqrt()
    }

    /// Annualized expected return of a weight vector.
    pub fn expected_return(&self, weights: &DVector<f64>) -> f64 {
        weights.dot(&self.expected_returns)
    }
}

/// Converged solver output.
#[derive(Debug, Clone)]
pub struct Solution {
    pub weights: DVector<f64>,
    pub iterations: usize,
}

/// Compute the minimum-variance allocation for the positions.
///
/// Current weights are taken from [`Position::weight`]. Every failure mode
/// resolves to [`OptimizationResult::Unavailable`].
pub fn optimize_weights(
    positions: &[Position],
    prices: &PriceTable,
    target_return: Option<f64>,
    config: &RiskConfig,
) -> OptimizationResult {
    let universe = match AssetUniverse::build(positions, prices, config.min_observations) {
        Ok(universe) => universe,
        Err(reason) => {
            warn!(?reason, "optimization unavailable");
            return OptimizationResult::unavailable(reason);
        }
    };

    if let Some(target) = target_return {
        let lo = universe.expected_returns.min();
        let hi = universe.expected_returns.max();
        if !(target >= lo - RETURN_TOLERANCE && target <= hi + RETURN_TOLERANCE) {
            warn!(target, lo, hi, "target return outside attainable range");
            return OptimizationResult::unavailable(UnavailableReason::InfeasibleTarget);
        }
    }

    let current: HashMap<&str, f64> = positions
        .iter()
        .map(|p| (p.symbol.as_str(), p.weight))
        .collect();
    let initial = DVector::from_iterator(
        universe.symbols.len(),
        universe
            .symbols
            .iter()
            .map(|s| current.get(s.as_str()).copied().unwrap_or(0.0)),
    );

    let constraint = target_return.map(|t| (&universe.expected_returns, t));
    let Some(solution) = minimize_variance(
        &universe.covariance,
        constraint,
        &initial_guess(&initial),
        &config.optimizer,
    ) else {
        warn!(
            assets = universe.symbols.len(),
            "optimizer did not converge"
        );
        return OptimizationResult::unavailable(UnavailableReason::DidNotConverge);
    };

    let volatility = universe.volatility(&solution.weights);
    let expected_return = universe.expected_return(&solution.weights);
    let sharpe = if volatility > 0.0 {
        (expected_return - config.risk_free_rate) / volatility
    } else {
        0.0
    };

    let mut optimized_weights: BTreeMap<String, f64> = universe
        .symbols
        .iter()
        .cloned()
        .zip(solution.weights.iter().copied())
        .collect();
    for symbol in &universe.excluded {
        optimized_weights.insert(symbol.clone(), 0.0);
    }
    let current_weights: BTreeMap<String, f64> = positions
        .iter()
        .map(|p| (p.symbol.clone(), p.weight))
        .collect();
    let weight_changes = optimized_weights
        .iter()
        .map(|(symbol, w)| {
            let before = current_weights.get(symbol).copied().unwrap_or(0.0);
            (symbol.clone(), w - before)
        })
        .collect();

    info!(
        assets = universe.symbols.len(),
        observations = universe.observations,
        iterations = solution.iterations,
        volatility,
        "optimized portfolio weights"
    );

    OptimizationResult::Optimized(OptimizedAllocation {
        optimized_weights,
        current_weights,
        optimized_volatility: volatility,
        optimized_return: expected_return,
        optimized_sharpe: sharpe,
        weight_changes,
        excluded_symbols: universe.excluded,
        iterations: solution.iterations,
    })
}

/// Minimize `wᵗΣw` over the simplex, optionally with `wᵗμ = target`.
///
/// Returns `None` if the iteration budget runs out first or the iterate
/// stops being finite.
pub fn minimize_variance(
    covariance: &DMatrix<f64>,
    constraint: Option<(&DVector<f64>, f64)>,
    initial: &DVector<f64>,
    settings: &OptimizerSettings,
) -> Option<Solution> {
    let curvature = 2.0 * row_sum_bound(covariance);

    // A zero return vector makes any feasible target trivially satisfied.
    let constraint = constraint.filter(|(mu, _)| mu.norm_squared() > f64::EPSILON * f64::EPSILON);
    let penalty = match constraint {
        Some((mu, _)) => PENALTY_SCALE * curvature.max(f64::EPSILON) / mu.norm_squared(),
        None => 0.0,
    };
    let lipschitz = curvature + constraint.map_or(0.0, |(mu, _)| penalty * mu.norm_squared());
    let step = if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 };

    let mut weights = project_simplex(initial);
    let mut multiplier = 0.0;
    let mut iterations = 0;

    for _ in 0..MAX_PENALTY_ROUNDS {
        let mut converged = false;
        while iterations < settings.max_iterations {
            iterations += 1;

            let mut gradient = (covariance * &weights) * 2.0;
            if let Some((mu, target)) = constraint {
                let pull = multiplier + penalty * (weights.dot(mu) - target);
                gradient.axpy(pull, mu, 1.0);
            }

            let next = project_simplex(&(&weights - gradient * step));
            if next.iter().any(|w| !w.is_finite()) {
                return None;
            }
            let delta = (&next - &weights).amax();
            weights = next;

            if delta <= settings.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            return None;
        }

        let Some((mu, target)) = constraint else {
            return Some(Solution {
                weights,
                iterations,
            });
        };

        let residual = weights.dot(mu) - target;
        if residual.abs() <= RETURN_TOLERANCE {
            return Some(Solution {
                weights,
                iterations,
            });
        }
        multiplier += penalty * residual;
    }

    None
}

/// Euclidean projection onto `{w : w ≥ 0, Σw = 1}`.
pub fn project_simplex(v: &DVector<f64>) -> DVector<f64> {
    if v.is_empty() {
        return DVector::zeros(0);
    }

    let mut sorted: Vec<f64> = v.iter().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.map(|x| (x - theta).max(0.0))
}

/// Starting point: current weights on the simplex, equal weights if unusable.
fn initial_guess(current: &DVector<f64>) -> DVector<f64> {
    if current.iter().all(|w| w.is_finite()) && current.sum() > 0.0 {
        project_simplex(current)
    } else {
        DVector::from_element(current.len(), 1.0 / current.len() as f64)
    }
}

/// Upper bound on the largest eigenvalue (max absolute row sum).
fn row_sum_bound(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .row_iter()
        .map(|row| row.abs().sum())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PricePoint;
    use approx::assert_relative_eq;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Price rows for a symbol whose returns follow `returns`, from day `offset`.
    fn price_rows(symbol: &str, returns: &[f64], offset: i64) -> Vec<PricePoint> {
        let mut price = 100.0;
        let mut rows = vec![PricePoint::new(start() + Duration::days(offset), symbol, price, 0.0)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            rows.push(PricePoint::new(
                start() + Duration::days(offset + i as i64 + 1),
                symbol,
                price,
                0.0,
            ));
        }
        rows
    }

    /// Two uncorrelated assets: A has variance 1e-4, B 4e-4 (daily).
    fn two_asset_table(n: usize) -> PriceTable {
        let a: Vec<f64> = (0..n)
            .map(|i| 0.001 + if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();
        let b: Vec<f64> = (0..n)
            .map(|i| 0.002 + if i % 4 < 2 { 0.02 } else { -0.02 })
            .collect();
        let mut rows = price_rows("AAA", &a, 0);
        rows.extend(price_rows("BBB", &b, 0));
        PriceTable::new(rows)
    }

    fn half_half() -> Vec<Position> {
        vec![
            Position::new("AAA", 50.0, 100.0, 100.0).with_weight(0.5),
            Position::new("BBB", 50.0, 100.0, 100.0).with_weight(0.5),
        ]
    }

    fn sum(weights: &BTreeMap<String, f64>) -> f64 {
        weights.values().sum()
    }

    #[test]
    fn test_project_simplex() {
        let w = project_simplex(&DVector::from_vec(vec![0.3, 0.2]));
        assert_relative_eq!(w[0], 0.55, epsilon = 1e-12);
        assert_relative_eq!(w[1], 0.45, epsilon = 1e-12);

        let w = project_simplex(&DVector::from_vec(vec![2.0, -1.0, 0.0]));
        assert_eq!(w.as_slice(), &[1.0, 0.0, 0.0]);

        let already = project_simplex(&DVector::from_vec(vec![0.2, 0.3, 0.5]));
        assert_relative_eq!(already.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(already[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_minimum_variance_two_uncorrelated_assets() {
        let config = RiskConfig::default();
        let result = optimize_weights(&half_half(), &two_asset_table(40), None, &config);

        let allocation = result.allocation().expect("optimized");
        // w_A = var_B / (var_A + var_B)
        assert_relative_eq!(allocation.optimized_weights["AAA"], 0.8, epsilon = 1e-6);
        assert_relative_eq!(allocation.optimized_weights["BBB"], 0.2, epsilon = 1e-6);
        assert!((sum(&allocation.optimized_weights) - 1.0).abs() < 1e-6);
        assert_relative_eq!(allocation.weight_changes["AAA"], 0.3, epsilon = 1e-6);
        assert_relative_eq!(allocation.weight_changes["BBB"], -0.3, epsilon = 1e-6);

        let expected_return = 0.8 * 0.252 + 0.2 * 0.504;
        assert_relative_eq!(allocation.optimized_return, expected_return, epsilon = 1e-6);
        assert_relative_eq!(
            allocation.optimized_sharpe,
            (allocation.optimized_return - 0.02) / allocation.optimized_volatility,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_target_return() {
        let config = RiskConfig::default();
        let target = 0.5 * 0.252 + 0.5 * 0.504;
        let result = optimize_weights(&half_half(), &two_asset_table(40), Some(target), &config);

        let allocation = result.allocation().expect("optimized");
        assert_relative_eq!(allocation.optimized_weights["AAA"], 0.5, epsilon = 1e-5);
        assert_relative_eq!(allocation.optimized_return, target, epsilon = 1e-6);
        assert!((sum(&allocation.optimized_weights) - 1.0).abs() < 1e-6);
    }

    /// Four assets driven by a common factor, one year of daily returns.
    fn four_asset_table() -> PriceTable {
        let mut rng = StdRng::seed_from_u64(29);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let specs = [
            ("AAA", 0.0005, 0.010, 0.012),
            ("BBB", 0.0020, 0.020, 0.014),
            ("CCC", -0.0010, 0.004, 0.016),
            ("DDD", 0.0035, 0.025, 0.020),
        ];
        let mut series = vec![Vec::with_capacity(250); specs.len()];
        for _ in 0..250 {
            let market: f64 = noise.sample(&mut rng);
            for (returns, (_, drift, beta, idio)) in series.iter_mut().zip(&specs) {
                returns.push(drift + beta * market + idio * noise.sample(&mut rng));
            }
        }

        let mut rows = Vec::new();
        for ((symbol, ..), returns) in specs.iter().zip(&series) {
            rows.extend(price_rows(symbol, returns, 0));
        }
        PriceTable::new(rows)
    }

    #[test]
    fn test_target_return_minimizes_across_many_assets() {
        let prices = four_asset_table();
        let positions: Vec<Position> = ["AAA", "BBB", "CCC", "DDD"]
            .iter()
            .map(|s| Position::new(s, 1.0, 100.0, 100.0).with_weight(0.25))
            .collect();
        let universe = AssetUniverse::build(&positions, &prices, 30).unwrap();
        let mu = &universe.expected_returns;
        let (lo, hi) = (mu.min(), mu.max());
        assert!(hi - lo > 0.1);
        let target = lo + 0.6 * (hi - lo);

        let config = RiskConfig::default();
        let result = optimize_weights(&positions, &prices, Some(target), &config);
        let allocation = result.allocation().expect("optimized");

        assert!((sum(&allocation.optimized_weights) - 1.0).abs() < 1e-6);
        assert!(allocation.optimized_weights.values().all(|w| *w >= 0.0));
        assert_relative_eq!(allocation.optimized_return, target, epsilon = 1e-6);

        // Every pair of assets straddling the target gives a feasible mix with
        // the same return; so does any blend of two such mixes.
        let n = universe.symbols.len();
        let mut feasible = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if mu[i] < target && mu[j] > target {
                    let t = (target - mu[i]) / (mu[j] - mu[i]);
                    feasible.push(DVector::from_fn(n, |k, _| {
                        if k == i {
                            1.0 - t
                        } else if k == j {
                            t
                        } else {
                            0.0
                        }
                    }));
                }
            }
        }
        assert!(feasible.len() >= 3);
        let blends: Vec<DVector<f64>> = feasible
            .windows(2)
            .map(|pair| (&pair[0] + &pair[1]) * 0.5)
            .collect();

        for mix in feasible.iter().chain(&blends) {
            assert_relative_eq!(universe.expected_return(mix), target, epsilon = 1e-9);
            assert!(allocation.optimized_volatility <= universe.volatility(mix) + 1e-6);
        }
    }

    #[test]
    fn test_infeasible_target() {
        let config = RiskConfig::default();
        let result = optimize_weights(&half_half(), &two_asset_table(40), Some(2.0), &config);
        assert_eq!(
            result,
            OptimizationResult::unavailable(UnavailableReason::InfeasibleTarget)
        );
    }

    #[test]
    fn test_single_asset_is_unavailable() {
        let config = RiskConfig::default();
        let positions = vec![Position::new("AAA", 1.0, 100.0, 100.0).with_weight(1.0)];
        let result = optimize_weights(&positions, &two_asset_table(40), None, &config);
        assert_eq!(
            result,
            OptimizationResult::unavailable(UnavailableReason::InsufficientAssets)
        );
    }

    #[test]
    fn test_short_history_is_unavailable() {
        let config = RiskConfig::default();
        let result = optimize_weights(&half_half(), &two_asset_table(29), None, &config);
        assert_eq!(
            result,
            OptimizationResult::unavailable(UnavailableReason::InsufficientAssets)
        );
    }

    #[test]
    fn test_short_overlap_is_unavailable() {
        let config = RiskConfig::default();
        let returns: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let mut rows = price_rows("AAA", &returns, 0);
        // Shifted by 20 days: only 20 shared return dates
        rows.extend(price_rows("BBB", &returns, 20));

        let result = optimize_weights(&half_half(), &PriceTable::new(rows), None, &config);
        assert_eq!(
            result,
            OptimizationResult::unavailable(UnavailableReason::InsufficientOverlap)
        );
    }

    #[test]
    fn test_asset_without_history_is_excluded() {
        let config = RiskConfig::default();
        let mut positions = half_half();
        positions[0].weight = 0.4;
        positions[1].weight = 0.4;
        positions.push(Position::new("NEW", 10.0, 1.0, 1.0).with_weight(0.2));

        let result = optimize_weights(&positions, &two_asset_table(40), None, &config);
        let allocation = result.allocation().expect("optimized");

        assert_eq!(allocation.excluded_symbols, vec!["NEW".to_string()]);
        assert_eq!(allocation.optimized_weights["NEW"], 0.0);
        assert_relative_eq!(allocation.weight_changes["NEW"], -0.2);
        assert!((sum(&allocation.optimized_weights) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iteration_limit_is_unavailable() {
        let mut config = RiskConfig::default();
        config.optimizer.max_iterations = 1;

        let result = optimize_weights(&half_half(), &two_asset_table(40), None, &config);
        assert_eq!(
            result,
            OptimizationResult::unavailable(UnavailableReason::DidNotConverge)
        );
    }

    #[test]
    fn test_three_correlated_assets() {
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let n = 90;
        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        let mut c = Vec::with_capacity(n);
        for _ in 0..n {
            let market: f64 = noise.sample(&mut rng);
            a.push(0.0010 + 0.015 * market + 0.010 * noise.sample(&mut rng));
            b.push(0.0015 + 0.025 * market + 0.015 * noise.sample(&mut rng));
            c.push(0.0005 + 0.005 * market + 0.020 * noise.sample(&mut rng));
        }
        let mut rows = price_rows("AAA", &a, 0);
        rows.extend(price_rows("BBB", &b, 0));
        rows.extend(price_rows("CCC", &c, 0));
        let prices = PriceTable::new(rows);

        let positions = vec![
            Position::new("AAA", 1.0, 100.0, 100.0).with_weight(0.2),
            Position::new("BBB", 1.0, 100.0, 100.0).with_weight(0.5),
            Position::new("CCC", 1.0, 100.0, 100.0).with_weight(0.3),
        ];

        let config = RiskConfig::default();
        let result = optimize_weights(&positions, &prices, None, &config);
        let allocation = result.allocation().expect("optimized");

        assert!((sum(&allocation.optimized_weights) - 1.0).abs() < 1e-6);
        assert!(allocation
            .optimized_weights
            .values()
            .all(|w| (0.0..=1.0).contains(w)));

        let universe = AssetUniverse::build(&positions, &prices, 30).unwrap();
        let current = universe.volatility(&DVector::from_vec(vec![0.2, 0.5, 0.3]));
        assert!(allocation.optimized_volatility <= current + 1e-12);
        for i in 0..3 {
            let corner = DVector::from_fn(3, |j, _| if i == j { 1.0 } else { 0.0 });
            assert!(allocation.optimized_volatility <= universe.volatility(&corner) + 1e-12);
        }
    }

    #[test]
    fn test_zero_current_weights_start_from_equal_weights() {
        let config = RiskConfig::default();
        let positions = vec![
            Position::new("AAA", 1.0, 100.0, 100.0),
            Position::new("BBB", 1.0, 100.0, 100.0),
        ];

        let result = optimize_weights(&positions, &two_asset_table(40), None, &config);
        let allocation = result.allocation().expect("optimized");
        assert_relative_eq!(allocation.optimized_weights["AAA"], 0.8, epsilon = 1e-6);
        assert_relative_eq!(allocation.weight_changes["AAA"], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_universe_statistics() {
        let universe = AssetUniverse::build(&half_half(), &two_asset_table(40), 30).unwrap();

        assert_eq!(universe.symbols, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(universe.observations, 40);
        assert_relative_eq!(universe.expected_returns[0], 0.252, epsilon = 1e-9);
        assert_relative_eq!(universe.expected_returns[1], 0.504, epsilon = 1e-9);
        assert_relative_eq!(universe.covariance[(0, 0)], 1e-4 * 40.0 / 39.0 * 252.0, epsilon = 1e-9);
        assert_relative_eq!(universe.covariance[(0, 1)], 0.0, epsilon = 1e-9);
        assert_relative_eq!(universe.covariance[(0, 1)], universe.covariance[(1, 0)], epsilon = 1e-15);
    }
}
